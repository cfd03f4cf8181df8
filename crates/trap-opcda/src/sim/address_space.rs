// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The simulated namespace.
//!
//! Tags are stored flat by fully qualified ID; branches are derived from the
//! `.`-separated segments of those IDs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{ArrayValue, Variant};
use crate::error::{ConfigurationError, OpcDaError, OpcDaResult};
use crate::types::{hresult, property, AccessRights, BrowseType, EuInfo, Quality, VarType};

/// Separator between branch segments.
pub const DELIMITER: char = '.';

// =============================================================================
// Tags
// =============================================================================

/// One simulated data point.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTag {
    /// Current value.
    pub value: Variant,
    /// Quality bitfield.
    pub quality: u16,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
    /// Access rights.
    pub access_rights: AccessRights,
    /// Canonical data type; fixed at creation.
    pub canonical_type: VarType,
    /// Engineering units.
    pub eu_units: String,
    /// Description.
    pub description: String,
    /// Engineering-unit range or names.
    pub eu_info: Option<EuInfo>,
}

impl SimTag {
    /// Creates a readable and writeable tag with good quality.
    pub fn new(value: impl Into<Variant>) -> Self {
        let value = value.into();
        Self {
            canonical_type: value.var_type(),
            value,
            quality: Quality::GOOD.0,
            timestamp: Utc::now(),
            access_rights: AccessRights::READ_WRITE,
            eu_units: String::new(),
            description: String::new(),
            eu_info: None,
        }
    }

    /// Sets the access rights.
    pub fn access_rights(mut self, access_rights: AccessRights) -> Self {
        self.access_rights = access_rights;
        self
    }

    /// Sets the quality.
    pub fn quality(mut self, quality: u16) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the engineering units.
    pub fn eu_units(mut self, eu_units: impl Into<String>) -> Self {
        self.eu_units = eu_units.into();
        self
    }

    /// Sets the engineering-unit information.
    pub fn eu_info(mut self, eu_info: EuInfo) -> Self {
        self.eu_info = Some(eu_info);
        self
    }

    fn eu_type(&self) -> i32 {
        match self.eu_info {
            None | Some(EuInfo::Other(_)) => 0,
            Some(EuInfo::Analog { .. }) => 1,
            Some(EuInfo::Enumerated(_)) => 2,
        }
    }

    /// Returns a property value, or `None` for an unsupported ID.
    pub(crate) fn property(&self, id: u32) -> Option<Variant> {
        Some(match id {
            property::DATA_TYPE => Variant::I16(self.canonical_type.0 as i16),
            property::VALUE => self.value.clone(),
            property::QUALITY => Variant::I16(self.quality as i16),
            property::TIMESTAMP => Variant::Date(self.timestamp),
            property::ACCESS_RIGHTS => Variant::I32(self.access_rights.0 as i32),
            property::SCAN_RATE => Variant::F32(0.0),
            property::EU_TYPE => Variant::I32(self.eu_type()),
            property::EU_INFO => match &self.eu_info {
                None => Variant::Empty,
                Some(EuInfo::Analog { low, high }) => {
                    Variant::Array(ArrayValue::F64(vec![*low, *high]))
                }
                Some(EuInfo::Enumerated(names)) => {
                    Variant::Array(ArrayValue::String(names.clone()))
                }
                Some(EuInfo::Other(value)) => value.clone(),
            },
            property::EU_UNITS if !self.eu_units.is_empty() => {
                Variant::String(self.eu_units.clone())
            }
            property::DESCRIPTION if !self.description.is_empty() => {
                Variant::String(self.description.clone())
            }
            _ => return None,
        })
    }

    /// IDs of every property this tag exposes.
    pub(crate) fn property_ids(&self) -> Vec<u32> {
        let mut ids = vec![
            property::DATA_TYPE,
            property::VALUE,
            property::QUALITY,
            property::TIMESTAMP,
            property::ACCESS_RIGHTS,
            property::SCAN_RATE,
        ];
        if self.eu_info.is_some() {
            ids.extend([property::EU_TYPE, property::EU_INFO]);
        }
        if !self.eu_units.is_empty() {
            ids.push(property::EU_UNITS);
        }
        if !self.description.is_empty() {
            ids.push(property::DESCRIPTION);
        }
        ids
    }
}

// =============================================================================
// Configuration Form
// =============================================================================

/// A tag as written in a configuration file.
///
/// ```yaml
/// - id: Plant.Line1.Temperature
///   value: 21.5
///   access: rw
///   eu_units: degC
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Fully qualified item ID.
    pub id: String,
    /// Initial value: bool, number or string.
    #[serde(default)]
    pub value: serde_json::Value,
    /// `r`, `w` or `rw`.
    #[serde(default = "default_access")]
    pub access: String,
    /// Engineering units.
    #[serde(default)]
    pub eu_units: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

fn default_access() -> String {
    "rw".to_string()
}

impl TagConfig {
    /// Converts to a simulated tag.
    pub fn to_tag(&self) -> Result<SimTag, ConfigurationError> {
        let value = match &self.value {
            serde_json::Value::Null => Variant::Empty,
            serde_json::Value::Bool(v) => Variant::Bool(*v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => i32::try_from(v).map(Variant::I32).unwrap_or(Variant::I64(v)),
                None => Variant::F64(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Variant::String(s.clone()),
            other => {
                return Err(ConfigurationError::validation(
                    format!("tags[{}].value", self.id),
                    format!("unsupported value {}", other),
                ))
            }
        };
        let access_rights = match self.access.as_str() {
            "r" => AccessRights::READABLE,
            "w" => AccessRights::WRITEABLE,
            "rw" => AccessRights::READ_WRITE,
            other => {
                return Err(ConfigurationError::validation(
                    format!("tags[{}].access", self.id),
                    format!("'{}' is not one of r, w, rw", other),
                ))
            }
        };
        Ok(SimTag::new(value)
            .access_rights(access_rights)
            .eu_units(self.eu_units.clone())
            .description(self.description.clone()))
    }
}

// =============================================================================
// AddressSpace
// =============================================================================

/// The tags of a simulated server.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    tags: BTreeMap<String, SimTag>,
}

impl AddressSpace {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a tag.
    pub fn insert(&mut self, id: impl Into<String>, tag: SimTag) {
        self.tags.insert(id.into(), tag);
    }

    /// Returns a tag.
    pub fn get(&self, id: &str) -> Option<&SimTag> {
        self.tags.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut SimTag> {
        self.tags.get_mut(id)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` without tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Looks up a tag or fails with `OPC_E_UNKNOWNITEMID`.
    pub(crate) fn require(&self, id: &str) -> OpcDaResult<&SimTag> {
        self.get(id)
            .ok_or_else(|| OpcDaError::remote(format!("lookup of '{}'", id), hresult::OPC_E_UNKNOWNITEMID))
    }

    /// Returns `true` if `path` names a branch.
    pub(crate) fn is_branch(&self, path: &[String]) -> bool {
        path.is_empty() || self.under(path).next().is_some()
    }

    fn under<'a>(&'a self, path: &'a [String]) -> impl Iterator<Item = (&'a str, &'a SimTag)> + 'a {
        let prefix = join(path);
        self.tags.iter().filter_map(move |(id, tag)| {
            if prefix.is_empty() {
                Some((id.as_str(), tag))
            } else {
                id.strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix(DELIMITER))
                    .map(|rest| (rest, tag))
            }
        })
    }

    /// Child branch names below `path`.
    pub(crate) fn branches(&self, path: &[String]) -> Vec<String> {
        let names: BTreeSet<String> = self
            .under(path)
            .filter_map(|(rest, _)| rest.split_once(DELIMITER).map(|(head, _)| head.to_string()))
            .collect();
        names.into_iter().collect()
    }

    /// Lists names at `path` matching the filters.
    pub(crate) fn browse(
        &self,
        path: &[String],
        browse_type: BrowseType,
        filter: &str,
        data_type: VarType,
        access_rights: AccessRights,
    ) -> Vec<String> {
        if browse_type == BrowseType::Branch {
            return self
                .branches(path)
                .into_iter()
                .filter(|name| matches_filter(filter, name))
                .collect();
        }

        let prefix = join(path);
        self.under(path)
            .filter(|(rest, _)| browse_type == BrowseType::Flat || !rest.contains(DELIMITER))
            .filter(|(_, tag)| data_type == VarType::EMPTY || tag.canonical_type == data_type)
            .filter(|(_, tag)| access_rights.0 == 0 || tag.access_rights.0 & access_rights.0 != 0)
            .filter(|(rest, _)| matches_filter(filter, rest))
            .map(|(rest, _)| match browse_type {
                BrowseType::Flat if !prefix.is_empty() => format!("{}{}{}", prefix, DELIMITER, rest),
                _ => rest.to_string(),
            })
            .collect()
    }
}

/// Builds an item ID from branch segments.
pub(crate) fn join(path: &[String]) -> String {
    path.join(&DELIMITER.to_string())
}

/// Matches `*` (any run) and `?` (one character); an empty filter matches all.
pub(crate) fn matches_filter(filter: &str, name: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    let pattern: Vec<char> = filter.chars().collect();
    let text: Vec<char> = name.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> AddressSpace {
        let mut space = AddressSpace::new();
        space.insert("RootItem1", SimTag::new(1i32));
        space.insert("Folder1.Item1", SimTag::new(1.5f64));
        space.insert("Folder1.Item2", SimTag::new("text").access_rights(AccessRights::READABLE));
        space.insert("Folder1.SubFolder1.SubItem1", SimTag::new(true));
        space.insert("Folder2.Item3", SimTag::new(7u16));
        space
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_branches_and_leaves() {
        let space = space();
        assert_eq!(space.branches(&[]), vec!["Folder1", "Folder2"]);
        assert_eq!(space.branches(&path(&["Folder1"])), vec!["SubFolder1"]);

        let rw = AccessRights::READ_WRITE;
        let leaves = space.browse(&[], BrowseType::Leaf, "", VarType::EMPTY, rw);
        assert_eq!(leaves, vec!["RootItem1"]);

        let leaves = space.browse(&path(&["Folder1"]), BrowseType::Leaf, "", VarType::EMPTY, rw);
        assert_eq!(leaves, vec!["Item1", "Item2"]);

        let flat = space.browse(&path(&["Folder1"]), BrowseType::Flat, "", VarType::EMPTY, rw);
        assert_eq!(flat, vec!["Folder1.Item1", "Folder1.Item2", "Folder1.SubFolder1.SubItem1"]);

        assert!(space.is_branch(&path(&["Folder1", "SubFolder1"])));
        assert!(!space.is_branch(&path(&["Folder3"])));
    }

    #[test]
    fn test_leaf_filters() {
        let space = space();
        let folder = path(&["Folder1"]);
        let writable = space.browse(&folder, BrowseType::Leaf, "", VarType::EMPTY, AccessRights::WRITEABLE);
        assert_eq!(writable, vec!["Item1"]);

        let typed = space.browse(&folder, BrowseType::Leaf, "", VarType::BSTR, AccessRights::READ_WRITE);
        assert_eq!(typed, vec!["Item2"]);

        let named = space.browse(&folder, BrowseType::Leaf, "*2", VarType::EMPTY, AccessRights::READ_WRITE);
        assert_eq!(named, vec!["Item2"]);
    }

    #[test]
    fn test_matches_filter() {
        assert!(matches_filter("", "anything"));
        assert!(matches_filter("Item?", "Item1"));
        assert!(!matches_filter("Item?", "Item12"));
        assert!(matches_filter("*Item*", "SubItem1"));
        assert!(matches_filter("F*1", "Folder1"));
        assert!(!matches_filter("F*1", "Folder2"));
    }

    #[test]
    fn test_tag_config() {
        let config: TagConfig =
            serde_yaml::from_str("id: A.B\nvalue: 21.5\naccess: r\neu_units: degC\n").unwrap();
        let tag = config.to_tag().unwrap();
        assert_eq!(tag.value, Variant::F64(21.5));
        assert_eq!(tag.canonical_type, VarType::R8);
        assert_eq!(tag.access_rights, AccessRights::READABLE);
        assert_eq!(tag.property(property::EU_UNITS), Some(Variant::String("degC".into())));

        let config: TagConfig = serde_yaml::from_str("id: A.C\nvalue: 3\n").unwrap();
        assert_eq!(config.to_tag().unwrap().value, Variant::I32(3));

        let bad: TagConfig = serde_yaml::from_str("id: A.D\naccess: x\n").unwrap();
        assert!(bad.to_tag().is_err());
    }
}
