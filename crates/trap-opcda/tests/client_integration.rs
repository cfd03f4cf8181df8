// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Client Integration Tests
//!
//! End-to-end tests of the client against the in-memory server:
//!
//! - Discovery and connection
//! - Group and item management
//! - Synchronous and asynchronous I/O
//! - Event delivery
//! - Browsing
//! - Reference accounting
//!
//! ## Test Categories
//!
//! - `test_discovery_*`: Server resolution and enumeration
//! - `test_session_*`: Session lifecycle and status
//! - `test_group_*`: Group collection and state
//! - `test_item_*`: Item collection and per-item operations
//! - `test_io_*`: Synchronous and asynchronous reads and writes
//! - `test_events_*`: Subscriptions and delivery
//! - `test_browse_*`: Address-space browsing
//! - `test_release_*`: Handle release and nil safety

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;

use trap_opcda::sim::{SimOp, SimServer, SimTag, DEFAULT_PROG_ID};
use trap_opcda::{
    hresult, AccessRights, ArrayValue, ClientConfig, ConnectionError, DataSource, DiscoveryTier,
    EuInfo, OpcBrowser, OpcDaError, OpcGroup, OpcItem, OpcServer, Quality, ServerState,
    UsageError, VarType, Variant,
};

// =============================================================================
// Test Helpers
// =============================================================================

const WAIT: Duration = Duration::from_secs(2);

/// Creates a simulator with a small plant address space.
fn plant() -> SimServer {
    SimServer::builder()
        .tag("Folder1.Item1", SimTag::new(123.45_f64))
        .tag("Folder1.Item2", SimTag::new(7_i32))
        .tag("Folder2.Item1", SimTag::new("idle"))
        .tag("Folder2.Item2", SimTag::new(true))
        .tag(
            "Folder2.Setpoint",
            SimTag::new(10.0_f32)
                .eu_units("bar")
                .eu_info(EuInfo::Analog { low: 0.0, high: 16.0 }),
        )
        .tag(
            "Folder1.ReadOnly",
            SimTag::new(1_i16).access_rights(AccessRights::READABLE),
        )
        .build()
}

async fn connect(sim: &SimServer) -> OpcServer {
    OpcServer::connect(&sim.connector(), DEFAULT_PROG_ID, "localhost")
        .await
        .expect("connect to simulator")
}

async fn group_with(server: &OpcServer, name: &str, tags: &[&str]) -> (OpcGroup, Vec<OpcItem>) {
    let group = server.groups().add(name).await.expect("add group");
    let (items, errors) = group.items().add_items(tags).await.expect("add items");
    assert!(errors.iter().all(Option::is_none), "unexpected item errors: {:?}", errors);
    (group, items)
}

fn handles(items: &[OpcItem]) -> Vec<u32> {
    items.iter().map(OpcItem::server_handle).collect()
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[tokio::test]
async fn test_discovery_falls_back_through_tiers() {
    let sim = plant();
    let resolver = sim.resolver();

    resolver.fail_tier(DiscoveryTier::ServerList2, true);
    let server = connect(&sim).await;
    assert!(server.is_connected());
    assert_eq!(server.clsid(), Some(sim.info().clsid));
    server.disconnect().await.unwrap();

    resolver.fail_tier(DiscoveryTier::ServerList, true);
    let server = connect(&sim).await;
    assert_eq!(server.clsid(), Some(sim.info().clsid));
    server.disconnect().await.unwrap();

    resolver.fail_tier(DiscoveryTier::Registry, true);
    let err = OpcServer::connect(&sim.connector(), DEFAULT_PROG_ID, "")
        .await
        .unwrap_err();
    match err {
        OpcDaError::Connection(ConnectionError::DiscoveryFailed { prog_id, causes }) => {
            assert_eq!(prog_id, DEFAULT_PROG_ID);
            assert_eq!(causes.len(), 3);
            assert!(causes[0].contains("server list v2"));
            assert!(causes[2].contains("registry"));
        }
        other => panic!("expected discovery failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_discovery_unknown_prog_id() {
    let sim = plant();
    let err = OpcServer::connect(&sim.connector(), "Nobody.Here.1", "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpcDaError::Connection(ConnectionError::DiscoveryFailed { .. })
    ));
    assert_eq!(sim.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_discovery_get_servers() {
    let sim = plant();
    let connector = sim.connector();

    let servers = connector.get_servers("").await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].prog_id, DEFAULT_PROG_ID);
    assert_eq!(servers[0].ver_ind_prog_id, "Trap.Simulator");

    sim.resolver().fail_tier(DiscoveryTier::ServerList2, true);
    sim.resolver().fail_tier(DiscoveryTier::ServerList, true);
    let servers = connector.get_servers("").await.unwrap();
    assert_eq!(servers[0].clsid, sim.info().clsid);

    sim.resolver().fail_tier(DiscoveryTier::Registry, true);
    assert!(connector.get_servers("").await.is_err());
}

#[tokio::test]
async fn test_discovery_activation_failure_releases_nothing() {
    let sim = plant();
    sim.fail_next(SimOp::Activate, hresult::E_FAIL);
    let err = OpcServer::connect(&sim.connector(), DEFAULT_PROG_ID, "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpcDaError::Connection(ConnectionError::ActivationFailed { .. })
    ));
    assert_eq!(sim.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_discovery_missing_common_interface_is_fatal() {
    let sim = plant();
    sim.fail_next(SimOp::QueryCommon, hresult::E_NOINTERFACE);
    assert!(OpcServer::connect(&sim.connector(), DEFAULT_PROG_ID, "")
        .await
        .is_err());
    assert_eq!(sim.ledger().outstanding(), 0);
    assert_eq!(sim.session_count(), 0);
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn test_session_status() {
    let sim = plant();
    let server = connect(&sim).await;

    let status = server.status().await.unwrap();
    assert_eq!(status.server_state, ServerState::Running);
    assert_eq!(status.group_count, 0);
    assert_eq!(
        (status.major_version, status.minor_version, status.build_number),
        (2, 5, 1)
    );

    server.groups().add("a").await.unwrap();
    assert_eq!(server.group_count().await.unwrap(), 1);

    sim.set_server_state(ServerState::Suspended);
    assert_eq!(server.server_state().await.unwrap(), ServerState::Suspended);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_session_locale_and_client_name() {
    let sim = plant();
    let server = connect(&sim).await;

    let locales = server.query_available_locale_ids().await.unwrap();
    assert!(locales.contains(&0x0409));
    server.set_locale_id(0x0409).await.unwrap();
    assert_eq!(server.locale_id().await.unwrap(), 0x0409);
    assert!(server.set_locale_id(0x0411).await.is_err());

    server.set_client_name("line-monitor").await.unwrap();
    assert_eq!(server.client_name(), "line-monitor");

    sim.fail_next(SimOp::SetClientName, hresult::E_FAIL);
    assert!(server.set_client_name("other").await.is_err());
    assert_eq!(server.client_name(), "line-monitor");

    let text = server.error_string(hresult::OPC_E_UNKNOWNITEMID).await.unwrap();
    assert!(text.contains("OPC_E_UNKNOWNITEMID"));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_session_config_applied_on_connect() {
    let sim = plant();
    let mut config = ClientConfig::default();
    config.client_name = Some("configured".to_string());
    config.group.update_rate_ms = 250;

    let connector = sim.connector().with_config(config);
    let server = OpcServer::connect(&connector, DEFAULT_PROG_ID, "").await.unwrap();
    assert_eq!(server.client_name(), "configured");

    let group = server.groups().add("cfg").await.unwrap();
    assert_eq!(group.revised_update_rate(), 250);
    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_session_item_properties() {
    let sim = plant();
    let server = connect(&sim).await;

    let available = server
        .query_available_properties("Folder2.Setpoint")
        .await
        .unwrap();
    let ids: Vec<u32> = available.iter().map(|p| p.id).collect();
    assert!(ids.contains(&trap_opcda::property::EU_UNITS));

    let (values, errors) = server
        .get_item_properties(
            "Folder2.Setpoint",
            &[trap_opcda::property::VALUE, trap_opcda::property::EU_UNITS, 9999],
        )
        .await
        .unwrap();
    assert_eq!(values[0], Variant::F32(10.0));
    assert_eq!(values[1], Variant::String("bar".to_string()));
    assert!(errors[0].is_none());
    assert!(errors[2].is_some());

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_session_shutdown_notification() {
    let sim = plant();
    let server = connect(&sim).await;

    let (tx, mut rx) = mpsc::channel(4);
    server.register_shutdown(tx).await.unwrap();
    assert_eq!(sim.shutdown("maintenance"), 1);

    let reason = timeout(WAIT, rx.recv()).await.unwrap();
    assert_eq!(reason.as_deref(), Some("maintenance"));

    server.disconnect().await.unwrap();
    assert_eq!(sim.shutdown("again"), 0);
}

// =============================================================================
// Group Tests
// =============================================================================

#[tokio::test]
async fn test_group_collection_lookup() {
    let sim = plant();
    let server = connect(&sim).await;
    let groups = server.groups();

    let fast = groups.add("fast").await.unwrap();
    let slow = groups.add("slow").await.unwrap();
    assert_eq!(groups.count(), 2);
    assert_eq!(groups.item(1).unwrap().name(), "slow");
    assert!(matches!(
        groups.item(2),
        Err(OpcDaError::Usage(UsageError::IndexOutOfRange { index: 2, count: 2 }))
    ));
    assert_eq!(
        groups.get_by_server_handle(fast.server_handle()).unwrap().name(),
        "fast"
    );
    assert!(groups.get_by_name("missing").is_err());
    assert_ne!(fast.client_handle(), slow.client_handle());

    assert!(groups.add("fast").await.is_err());

    groups.remove_by_name("fast").await.unwrap();
    assert_eq!(groups.count(), 1);
    assert!(!fast.is_valid());
    assert_eq!(sim.group_count(), 1);

    groups.remove_all().await.unwrap();
    assert_eq!(groups.count(), 0);
    assert_eq!(sim.group_count(), 0);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_group_remote_first_rename() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("before").await.unwrap();

    sim.fail_next(SimOp::SetName, hresult::E_FAIL);
    assert!(group.set_name("after").await.is_err());
    assert_eq!(group.name(), "before");
    assert!(server.groups().get_by_name("before").is_ok());

    group.set_name("after").await.unwrap();
    assert_eq!(group.name(), "after");
    assert!(server.groups().get_by_name("after").is_ok());

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_group_state_round_trip() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("state").await.unwrap();

    let revised = group.set_update_rate(1).await.unwrap();
    assert_eq!(revised, 10);
    assert_eq!(group.revised_update_rate(), 10);
    assert_eq!(group.update_rate().await.unwrap(), 10);

    group.set_deadband(12.5).await.unwrap();
    assert_eq!(group.deadband().await.unwrap(), 12.5);
    assert!(group.set_deadband(150.0).await.is_err());
    assert_eq!(group.deadband().await.unwrap(), 12.5);

    group.set_time_bias(-60).await.unwrap();
    assert_eq!(group.time_bias().await.unwrap(), -60);

    sim.fail_next(SimOp::SetState, hresult::E_FAIL);
    assert!(group.set_is_active(false).await.is_err());
    assert!(group.is_active());
    group.set_is_active(false).await.unwrap();
    assert!(!group.is_active());

    group.set_client_handle(4242).await.unwrap();
    assert_eq!(group.client_handle(), 4242);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_group_mutators_keep_state_on_failure() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("guarded").await.unwrap();
    let rate = group.revised_update_rate();
    let handle = group.client_handle();
    let bias = group.time_bias().await.unwrap();
    let locale = group.locale_id().await.unwrap();

    sim.fail_next(SimOp::SetState, hresult::E_FAIL);
    assert!(group.set_update_rate(250).await.is_err());
    assert_eq!(group.revised_update_rate(), rate);
    assert_eq!(group.update_rate().await.unwrap(), rate);

    sim.fail_next(SimOp::SetState, hresult::E_FAIL);
    assert!(group.set_client_handle(handle + 100).await.is_err());
    assert_eq!(group.client_handle(), handle);

    sim.fail_next(SimOp::SetState, hresult::E_FAIL);
    assert!(group.set_time_bias(bias + 30).await.is_err());
    assert_eq!(group.time_bias().await.unwrap(), bias);

    sim.fail_next(SimOp::SetState, hresult::E_FAIL);
    assert!(group.set_locale_id(0x0409).await.is_err());
    assert_eq!(group.locale_id().await.unwrap(), locale);

    assert_eq!(group.set_update_rate(250).await.unwrap(), 250);
    assert_eq!(group.revised_update_rate(), 250);
    group.set_client_handle(handle + 100).await.unwrap();
    assert_eq!(group.client_handle(), handle + 100);
    group.set_time_bias(bias + 30).await.unwrap();
    assert_eq!(group.time_bias().await.unwrap(), bias + 30);
    group.set_locale_id(0x0409).await.unwrap();
    assert_eq!(group.locale_id().await.unwrap(), 0x0409);

    server.disconnect().await.unwrap();
}

// =============================================================================
// Item Tests
// =============================================================================

#[tokio::test]
async fn test_item_batch_independence() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("batch").await.unwrap();
    let items = group.items();

    let (added, errors) = items
        .add_items(&["Folder1.Item1", "No.Such.Tag", "Folder1.Item2", ""])
        .await
        .unwrap();
    assert_eq!(added.len(), 4);
    assert!(errors[0].is_none());
    assert_eq!(
        errors[1].as_ref().and_then(OpcDaError::hresult),
        Some(hresult::OPC_E_UNKNOWNITEMID)
    );
    assert!(errors[2].is_none());
    assert_eq!(
        errors[3].as_ref().and_then(OpcDaError::hresult),
        Some(hresult::OPC_E_INVALIDITEMID)
    );
    assert!(added[0].is_valid() && !added[1].is_valid() && added[2].is_valid());
    assert_eq!(items.count(), 2);
    assert_eq!(added[0].canonical_data_type(), VarType::R8);
    assert_eq!(added[1].server_handle(), 0);

    let checked = items
        .validate(&["Folder1.Item2", "nope"], Some(&[VarType::R8, VarType::EMPTY][..]), None)
        .await
        .unwrap();
    assert!(checked[0].is_none());
    assert!(checked[1].is_some());
    assert_eq!(items.count(), 2);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_item_remove_partial() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "rm", &["Folder1.Item1", "Folder1.Item2"]).await;
    let items = group.items();

    items.remove(&[added[0].server_handle(), 987_654]).await.unwrap();
    assert_eq!(items.count(), 1);
    assert!(!added[0].is_valid());
    assert!(items.get_item(added[1].server_handle()).is_ok());
    assert!(matches!(
        items.get_item(added[0].server_handle()),
        Err(OpcDaError::Usage(UsageError::ItemNotFound { .. }))
    ));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_item_per_handle_mutators() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "mut", &["Folder1.Item1", "Folder1.Item2"]).await;
    let items = group.items();

    let errors = items
        .set_active(&[added[0].server_handle(), 55_555], false)
        .await
        .unwrap();
    assert!(errors[0].is_none());
    assert!(matches!(
        errors[1],
        Some(OpcDaError::Usage(UsageError::ItemNotFound { server_handle: 55_555 }))
    ));
    assert!(!added[0].is_active());

    let errors = items
        .set_client_handles(&[added[1].server_handle()], &[77])
        .await
        .unwrap();
    assert!(errors[0].is_none());
    assert_eq!(added[1].client_handle(), 77);

    let errors = items
        .set_data_types(&handles(&added), &[VarType::BSTR, VarType::ARRAY])
        .await
        .unwrap();
    assert!(errors[0].is_none());
    assert!(errors[1].is_some());
    assert_eq!(added[0].requested_data_type(), VarType::BSTR);
    assert_eq!(added[1].requested_data_type(), VarType::EMPTY);

    let read = added[0].read(DataSource::Device).await.unwrap();
    assert_eq!(read.value, Variant::String("123.45".to_string()));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_item_mutators_keep_state_on_failure() {
    let sim = plant();
    let server = connect(&sim).await;
    let (_group, added) = group_with(&server, "guarded-items", &["Folder1.Item2"]).await;
    let item = &added[0];
    let handle = item.client_handle();
    assert!(item.is_active());

    sim.fail_next(SimOp::SetActiveState, hresult::E_FAIL);
    assert!(item.set_active(false).await.is_err());
    assert!(item.is_active());

    sim.fail_next(SimOp::SetClientHandles, hresult::E_FAIL);
    assert!(item.set_client_handle(handle + 50).await.is_err());
    assert_eq!(item.client_handle(), handle);

    item.set_active(false).await.unwrap();
    assert!(!item.is_active());
    item.set_client_handle(handle + 50).await.unwrap();
    assert_eq!(item.client_handle(), handle + 50);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_item_error_text_falls_back_when_service_fails() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("texts").await.unwrap();

    let (_, errors) = group.items().add_items(&["No.Such.Tag"]).await.unwrap();
    let served = match &errors[0] {
        Some(OpcDaError::Item(e)) => e.message.clone(),
        other => panic!("expected an item error, got {:?}", other),
    };
    assert_ne!(served, hresult::describe(hresult::OPC_E_UNKNOWNITEMID));
    assert!(served.contains("OPC_E_UNKNOWNITEMID"));

    sim.fail_always(SimOp::GetErrorString, hresult::E_FAIL);
    let (_, errors) = group.items().add_items(&["No.Such.Tag"]).await.unwrap();
    match &errors[0] {
        Some(OpcDaError::Item(e)) => {
            assert_eq!(e.code, hresult::OPC_E_UNKNOWNITEMID);
            assert_eq!(e.message, hresult::describe(hresult::OPC_E_UNKNOWNITEMID));
        }
        other => panic!("expected an item error, got {:?}", other),
    }

    sim.clear_faults();
    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_item_read_write_and_eu() {
    let sim = plant();
    let server = connect(&sim).await;
    let (_group, added) =
        group_with(&server, "rw", &["Folder2.Setpoint", "Folder1.ReadOnly"]).await;

    added[0].write(&Variant::F32(12.0)).await.unwrap();
    assert_eq!(sim.value("Folder2.Setpoint"), Some(Variant::F32(12.0)));

    let read = added[0].read(DataSource::Device).await.unwrap();
    assert_eq!(read.value, Variant::F32(12.0));
    assert_eq!(added[0].value(), Variant::F32(12.0));
    assert_eq!(added[0].quality(), Quality::GOOD.0);

    assert_eq!(added[0].eu_type().await.unwrap(), 1);
    assert_eq!(
        added[0].eu_info().await.unwrap(),
        Some(EuInfo::Analog { low: 0.0, high: 16.0 })
    );
    assert_eq!(added[1].eu_type().await.unwrap(), 0);
    assert_eq!(added[1].eu_info().await.unwrap(), None);

    let err = added[1].write(&Variant::I16(5)).await.unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::OPC_E_BADRIGHTS));
    assert_eq!(sim.value("Folder1.ReadOnly"), Some(Variant::I16(1)));

    server.disconnect().await.unwrap();
}

// =============================================================================
// I/O Tests
// =============================================================================

#[tokio::test]
async fn test_io_sync_read_scenario() {
    let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let sim = SimServer::builder()
        .tag("Boiler.Temp", SimTag::new(123.45_f64).timestamp(stamp))
        .build();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "scenario", &["Boiler.Temp"]).await;

    let (states, errors) = group
        .sync_read(DataSource::Device, &handles(&added))
        .await
        .unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].value, Variant::F64(123.45));
    assert_eq!(states[0].quality, 192);
    assert_eq!(states[0].timestamp, stamp);
    assert_eq!(states[0].client_handle, added[0].client_handle());
    assert!(errors[0].is_none());

    assert_eq!(added[0].value(), Variant::F64(123.45));
    assert_eq!(added[0].timestamp(), stamp);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_sync_batch_independence() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "sync", &["Folder1.Item1", "Folder1.ReadOnly"]).await;

    let (states, errors) = group
        .sync_read(DataSource::Device, &[added[0].server_handle(), 31_337])
        .await
        .unwrap();
    assert_eq!(states[0].value, Variant::F64(123.45));
    assert!(errors[0].is_none());
    assert_eq!(
        errors[1].as_ref().and_then(OpcDaError::hresult),
        Some(hresult::OPC_E_INVALIDHANDLE)
    );

    let errors = group
        .sync_write(
            &handles(&added),
            &[Variant::F64(1.5), Variant::I16(9)],
        )
        .await
        .unwrap();
    assert!(errors[0].is_none());
    assert!(errors[1].is_some());
    assert_eq!(sim.value("Folder1.Item1"), Some(Variant::F64(1.5)));

    let heap = sim.heap().stats();
    assert_eq!(heap.live_allocations, 0);
    assert_eq!(heap.invalid_frees, 0);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_writes_release_text_and_array_values() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) =
        group_with(&server, "text-writes", &["Folder2.Item1", "Folder1.Item2"]).await;
    let values = [
        Variant::String("running".to_string()),
        Variant::Array(ArrayValue::String(vec!["a".to_string(), "b".to_string()])),
    ];
    let before = sim.heap().stats();

    group.sync_write(&handles(&added), &values).await.unwrap();
    assert_eq!(sim.value("Folder2.Item1"), Some(Variant::String("running".to_string())));

    sim.fail_next(SimOp::SyncWrite, hresult::E_FAIL);
    assert!(group.sync_write(&handles(&added), &values).await.is_err());

    let (tx, mut rx) = mpsc::channel(8);
    group.register_write_complete(tx).await.unwrap();
    group.async_write(&handles(&added), &values, 21).await.unwrap();
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    sim.fail_next(SimOp::AsyncWrite, hresult::E_FAIL);
    assert!(group.async_write(&handles(&added), &values, 22).await.is_err());

    let heap = sim.heap().stats();
    assert!(heap.allocations > before.allocations);
    assert_eq!(heap.live_allocations, 0);
    assert_eq!(heap.invalid_frees, 0);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_cache_read_of_inactive_item() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "cache", &["Folder1.Item2"]).await;
    added[0].set_active(false).await.unwrap();

    let (states, _) = group
        .sync_read(DataSource::Cache, &handles(&added))
        .await
        .unwrap();
    assert_eq!(states[0].quality, Quality::BAD_OUT_OF_SERVICE.0);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_async_requires_subscription() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "unadvised", &["Folder1.Item1"]).await;

    let err = group.async_read(&handles(&added), 1).await.unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::CONNECT_E_NOCONNECTION));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_async_read_and_write() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "async", &["Folder1.Item2", "Folder2.Item1"]).await;

    let (read_tx, mut read_rx) = mpsc::channel(8);
    let (write_tx, mut write_rx) = mpsc::channel(8);
    group.register_read_complete(read_tx).await.unwrap();
    group.register_write_complete(write_tx).await.unwrap();
    assert!(group.is_advised().await);

    let (_, errors) = group.async_read(&handles(&added), 11).await.unwrap();
    assert!(errors.iter().all(Option::is_none));
    let event = timeout(WAIT, read_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.transaction_id, 11);
    assert_eq!(event.group_handle, group.client_handle());
    assert_eq!(event.items.len(), 2);
    assert_eq!(event.items[0].value, Variant::I32(7));
    assert_eq!(event.items[1].value, Variant::String("idle".to_string()));

    let (_, errors) = group
        .async_write(&[added[0].server_handle()], &[Variant::I32(8)], 12)
        .await
        .unwrap();
    assert!(errors[0].is_none());
    let event = timeout(WAIT, write_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.transaction_id, 12);
    assert_eq!(event.items.len(), 1);
    assert!(event.items[0].error.is_none());
    assert_eq!(sim.value("Folder1.Item2"), Some(Variant::I32(8)));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_io_refresh_and_cancel() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, _added) = group_with(&server, "refresh", &["Folder1.Item1"]).await;

    let (data_tx, mut data_rx) = mpsc::channel(8);
    let (cancel_tx, mut cancel_rx) = mpsc::channel(8);
    group.register_data_change(data_tx).await.unwrap();
    group.register_cancel_complete(cancel_tx).await.unwrap();

    group.async_refresh(DataSource::Cache, 21).await.unwrap();
    let event = timeout(WAIT, data_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.transaction_id, 21);
    assert_eq!(event.items[0].value, Variant::F64(123.45));

    sim.set_async_delay(Duration::from_millis(500));
    let cancel_id = group.async_refresh(DataSource::Device, 22).await.unwrap();
    group.async_cancel(cancel_id).await.unwrap();
    let event = timeout(WAIT, cancel_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.transaction_id, 22);
    assert!(group.async_cancel(cancel_id).await.is_err());

    group.set_is_active(false).await.unwrap();
    assert!(group.async_refresh(DataSource::Cache, 23).await.is_err());

    server.disconnect().await.unwrap();
}

// =============================================================================
// Event Tests
// =============================================================================

#[tokio::test]
async fn test_events_data_change_updates_cache() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, added) = group_with(&server, "events", &["Folder1.Item1"]).await;

    let (first_tx, mut first_rx) = mpsc::channel(8);
    let (second_tx, mut second_rx) = mpsc::channel(8);
    group.register_data_change(first_tx).await.unwrap();
    group.register_data_change(second_tx).await.unwrap();

    sim.set_value("Folder1.Item1", 99.5_f64).unwrap();

    for rx in [&mut first_rx, &mut second_rx] {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.transaction_id, 0);
        assert_eq!(event.items[0].client_handle, added[0].client_handle());
        assert_eq!(event.items[0].value, Variant::F64(99.5));
    }
    assert_eq!(added[0].value(), Variant::F64(99.5));

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_events_drop_on_full() {
    const CAPACITY: usize = 4;

    let sim = plant();
    let config = ClientConfig {
        event_queue_capacity: CAPACITY,
        ..ClientConfig::default()
    };
    let server = OpcServer::connect(&sim.connector().with_config(config), DEFAULT_PROG_ID, "")
        .await
        .unwrap();
    let (group, _added) = group_with(&server, "burst", &["Folder1.Item2"]).await;

    let (tx, mut rx) = mpsc::channel(CAPACITY);
    group.register_data_change(tx).await.unwrap();

    // No await between notifications: the dispatch task cannot drain.
    for value in 0..(CAPACITY as i32 + 5) {
        sim.set_value("Folder1.Item2", value).unwrap();
    }

    let mut observed = 0;
    while let Ok(Some(_)) = timeout(Duration::from_millis(200), rx.recv()).await {
        observed += 1;
    }
    assert!(observed <= CAPACITY, "observed {observed} events");
    assert!(observed > 0);

    let stats = group.dispatch_stats();
    assert_eq!(stats.received, CAPACITY as u64);
    assert_eq!(stats.queue_dropped, 5);

    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_events_closed_subscriber_does_not_block_others() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, _added) = group_with(&server, "closed", &["Folder1.Item2"]).await;

    let (closed_tx, closed_rx) = mpsc::channel(8);
    let (open_tx, mut open_rx) = mpsc::channel(8);
    group.register_data_change(closed_tx).await.unwrap();
    group.register_data_change(open_tx).await.unwrap();
    drop(closed_rx);

    sim.set_value("Folder1.Item2", 3_i32).unwrap();
    let event = timeout(WAIT, open_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.items[0].value, Variant::I32(3));
    assert_eq!(group.dispatch_stats().dropped_closed, 1);

    server.disconnect().await.unwrap();
}

// =============================================================================
// Browse Tests
// =============================================================================

#[tokio::test]
async fn test_browse_and_resolve() {
    let sim = plant();
    let server = connect(&sim).await;
    let browser = server.create_browser().await.unwrap();

    browser.move_to_root().await.unwrap();
    browser.show_branches().await.unwrap();
    assert_eq!(browser.names(), vec!["Folder1", "Folder2"]);

    browser.move_down("Folder1").await.unwrap();
    browser.show_leafs(false).await.unwrap();
    assert_eq!(browser.count(), 3);
    assert_eq!(browser.item(0).unwrap(), "Item1");
    assert_eq!(browser.item_id("Item1").await.unwrap(), "Folder1.Item1");
    assert_eq!(browser.current_position().await.unwrap(), "Folder1");

    browser.move_to(&["Folder2"]).await.unwrap();
    browser.set_filter("Item*");
    browser.show_leafs(false).await.unwrap();
    assert_eq!(browser.names(), vec!["Item1", "Item2"]);

    browser.move_up().await.unwrap();
    assert_eq!(browser.current_position().await.unwrap(), "");
    assert!(browser.move_down("Nowhere").await.is_err());

    browser.release();
    server.disconnect().await.unwrap();
    assert_eq!(sim.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_browse_flat_with_access_filter() {
    let sim = plant();
    let server = connect(&sim).await;
    let browser = server.create_browser().await.unwrap();

    browser
        .set_access_rights(AccessRights::WRITEABLE)
        .unwrap();
    browser.set_filter("");
    browser.show_leafs(true).await.unwrap();
    assert!(!browser.names().iter().any(|n| n == "Folder1.ReadOnly"));
    assert!(browser.names().iter().any(|n| n == "Folder1.Item1"));

    assert!(matches!(
        browser.set_access_rights(AccessRights(0)),
        Err(OpcDaError::Usage(UsageError::InvalidAccessRights { rights: 0 }))
    ));

    browser.release();
    server.disconnect().await.unwrap();
}

// =============================================================================
// Release Tests
// =============================================================================

#[tokio::test]
async fn test_release_balances_every_reference() {
    let sim = plant();
    let server = connect(&sim).await;
    let (group, _added) = group_with(&server, "ledger", &["Folder1.Item1", "Folder1.Item2"]).await;
    let (tx, _rx) = mpsc::channel(8);
    group.register_data_change(tx).await.unwrap();
    let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
    server.register_shutdown(shutdown_tx).await.unwrap();
    server.groups().add("second").await.unwrap();
    assert!(sim.ledger().outstanding() > 0);

    server.disconnect().await.unwrap();
    server.disconnect().await.unwrap();

    let snapshot = sim.ledger().snapshot();
    assert_eq!(snapshot.outstanding, 0);
    assert_eq!(snapshot.over_released, 0);
    assert_eq!(sim.session_count(), 0);
    assert!(!server.is_connected());
}

#[tokio::test]
async fn test_release_group_twice() {
    let sim = plant();
    let server = connect(&sim).await;
    let group = server.groups().add("twice").await.unwrap();

    group.release().await.unwrap();
    group.release().await.unwrap();
    assert!(!group.is_valid());
    assert_eq!(server.groups().count(), 0);
    assert!(server.groups().get_by_name("twice").is_err());
    assert!(server.groups().get_by_server_handle(group.server_handle()).is_err());
    assert_eq!(sim.group_count(), 0);
    server.groups().add("twice").await.unwrap();
    assert_eq!(server.groups().count(), 1);
    assert!(matches!(
        group.set_name("x").await,
        Err(OpcDaError::Usage(_))
    ));

    server.disconnect().await.unwrap();
    assert_eq!(sim.ledger().snapshot().over_released, 0);
}

#[tokio::test]
async fn test_release_uninitialized_values() {
    let server = OpcServer::default();
    assert!(!server.is_connected());
    assert!(server.disconnect().await.is_ok());
    assert!(matches!(
        server.status().await,
        Err(OpcDaError::Usage(UsageError::Uninitialized { .. }))
    ));
    assert_eq!(server.groups().count(), 0);

    let group = OpcGroup::default();
    assert_eq!(group.name(), "");
    assert!(group.release().await.is_ok());
    assert!(group.sync_read(DataSource::Cache, &[1]).await.is_err());

    let item = OpcItem::default();
    assert_eq!(item.server_handle(), 0);
    assert!(item.read(DataSource::Cache).await.is_err());

    let browser = OpcBrowser::default();
    assert_eq!(browser.count(), 0);
    assert!(browser.move_to_root().await.is_err());
}
