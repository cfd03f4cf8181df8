// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client runtime orchestration.
//!
//! The runtime owns the configuration, the in-process server and the
//! shutdown coordinator. Commands borrow a connected session through
//! [`ClientRuntime::session`], which always disconnects afterwards.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trap_opcda::sim::SimServer;
use trap_opcda::{Connector, OpcServer, Variant};

use crate::config::AppConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// ClientRuntime
// =============================================================================

/// Everything a command needs to talk to a server.
pub struct ClientRuntime {
    config: AppConfig,
    simulator: SimServer,
    shutdown: ShutdownCoordinator,
}

impl ClientRuntime {
    /// Creates a runtime and starts the in-process server.
    pub fn new(config: AppConfig) -> BinResult<Self> {
        let mut builder = SimServer::builder()
            .prog_id(config.simulator.prog_id.clone())
            .vendor(config.simulator.vendor.clone());
        for tag in &config.simulator.tags {
            builder = builder.tag(tag.id.clone(), tag.to_tag()?);
        }
        let simulator = builder.build();
        simulator.set_async_delay(Duration::from_millis(config.simulator.async_delay_ms));

        debug!(
            prog_id = %config.simulator.prog_id,
            tags = config.simulator.tags.len(),
            "Simulated server started"
        );

        Ok(Self {
            config,
            simulator,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the in-process server.
    pub fn simulator(&self) -> &SimServer {
        &self.simulator
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Returns a connector carrying the configured session settings.
    pub fn connector(&self) -> Connector {
        self.simulator
            .connector()
            .with_config(self.config.client.clone())
    }

    /// Connects to the configured server.
    pub async fn connect(&self) -> BinResult<OpcServer> {
        let server = self
            .connector()
            .connect(&self.config.prog_id, &self.config.node)
            .await
            .map_err(|e| {
                BinError::from(e).with_context(format!(
                    "Failed to connect to '{}'",
                    self.config.prog_id
                ))
            })?;
        info!(prog_id = %self.config.prog_id, node = %self.config.node, "Connected");
        Ok(server)
    }

    /// Runs `f` against a fresh session and disconnects afterwards.
    ///
    /// The session is disconnected even when `f` fails; the error of `f`
    /// takes precedence over a disconnect failure.
    pub async fn session<T, F, Fut>(&self, f: F) -> BinResult<T>
    where
        F: FnOnce(OpcServer) -> Fut,
        Fut: Future<Output = BinResult<T>>,
    {
        let server = self.connect().await?;
        let result = f(server.clone()).await;

        match server.disconnect().await {
            Ok(()) => debug!("Disconnected"),
            Err(e) if result.is_ok() => return Err(e.into()),
            Err(e) => warn!(error = %e, "Disconnect failed"),
        }
        result
    }

    /// Nudges numeric tags every `period` until shutdown.
    ///
    /// Integers count up by one; floats drift by a small sine step; booleans
    /// toggle every tenth tick.
    pub fn spawn_activity(&self, tags: Vec<String>, period: Duration) -> JoinHandle<()> {
        let simulator = self.simulator.clone();
        let mut signal = self.shutdown.shutdown_signal();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = signal.wait() => break,
                    _ = interval.tick() => {}
                }
                tick += 1;
                for tag in &tags {
                    let Some(current) = simulator.value(tag) else {
                        continue;
                    };
                    if let Some(next) = next_value(&current, tick) {
                        if let Err(e) = simulator.set_value(tag, next) {
                            warn!(tag = %tag, error = %e, "Simulated update failed");
                        }
                    }
                }
            }
            debug!(ticks = tick, "Simulated activity stopped");
        })
    }
}

fn next_value(current: &Variant, tick: u64) -> Option<Variant> {
    let step = (tick as f64 / 5.0).sin();
    match current {
        Variant::F64(v) => Some(Variant::F64(v + step)),
        Variant::F32(v) => Some(Variant::F32(v + step as f32)),
        Variant::I32(v) => Some(Variant::I32(v.wrapping_add(1))),
        Variant::I16(v) => Some(Variant::I16(v.wrapping_add(1))),
        Variant::U16(v) => Some(Variant::U16(v.wrapping_add(1))),
        Variant::U32(v) => Some(Variant::U32(v.wrapping_add(1))),
        Variant::I64(v) => Some(Variant::I64(v.wrapping_add(1))),
        Variant::Bool(v) if tick % 10 == 0 => Some(Variant::Bool(!v)),
        _ => None,
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the client runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<AppConfig>,
    prog_id: Option<String>,
    node: Option<String>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the program ID to connect to.
    pub fn prog_id(mut self, prog_id: Option<String>) -> Self {
        self.prog_id = prog_id;
        self
    }

    /// Overrides the node to connect to.
    pub fn node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    /// Builds the runtime.
    ///
    /// A missing configuration file falls back to the defaults.
    pub fn build(self) -> BinResult<ClientRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                AppConfig::load_or_default(&path).map_err(|e| {
                    BinError::from(e).with_context(format!("Failed to load {}", path.display()))
                })?
            }
        };

        let config = config.with_overrides(self.prog_id.as_deref(), self.node.as_deref());
        trap_opcda::Validate::validate(&config)?;
        ClientRuntime::new(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_builder_requires_config() {
        assert!(RuntimeBuilder::new().build().is_err());
    }

    #[test]
    fn test_runtime_builder_rejects_invalid_override() {
        let result = RuntimeBuilder::new()
            .config(AppConfig::default())
            .prog_id(Some(String::new()))
            .build();
        assert!(matches!(result, Err(BinError::Config(_))));
    }

    #[tokio::test]
    async fn test_session_reads_configured_tag() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let value = runtime
            .session(|server| async move {
                let group = server.groups().add("test").await?;
                let item = group.items().add_item("Plant.Line1.Count").await?;
                Ok::<_, BinError>(item.read(trap_opcda::DataSource::Device).await?.value)
            })
            .await
            .unwrap();

        assert_eq!(value, Variant::I32(42));
        assert_eq!(runtime.simulator().session_count(), 0);
    }

    #[tokio::test]
    async fn test_session_disconnects_on_error() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let result: BinResult<()> = runtime
            .session(|server| async move {
                server.groups().add("test").await?;
                Err(BinError::runtime("boom"))
            })
            .await;

        assert!(matches!(result, Err(BinError::Runtime(_))));
        assert_eq!(runtime.simulator().session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_prog_id_fails_to_connect() {
        let runtime = RuntimeBuilder::new()
            .config(AppConfig::default())
            .prog_id(Some("Vendor.Missing.1".to_string()))
            .build()
            .unwrap();

        let err = runtime.connect().await.unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_activity_changes_values() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();
        let task = runtime.spawn_activity(
            vec!["Plant.Line1.Count".to_string()],
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        runtime.shutdown().initiate_shutdown("test");
        task.await.unwrap();

        assert_ne!(runtime.simulator().value("Plant.Line1.Count"), Some(Variant::I32(42)));
    }

    #[test]
    fn test_next_value() {
        assert_eq!(next_value(&Variant::I32(1), 1), Some(Variant::I32(2)));
        assert_eq!(next_value(&Variant::Bool(true), 10), Some(Variant::Bool(false)));
        assert_eq!(next_value(&Variant::Bool(true), 3), None);
        assert_eq!(next_value(&Variant::String("x".into()), 1), None);
    }
}
