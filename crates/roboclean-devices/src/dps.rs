//! Symbolic-attribute ↔ wire-key tables for the two protocol variants.
//!
//! A data point is one named field of device state or command, addressed
//! on the wire by a numeric-string key. The two device generations use
//! incompatible key schemes; both tables are fixed constants. Within one
//! variant a wire key is unique, but several symbolic keys may share a
//! wire key (the novel generation folds work mode and work status into a
//! single composite data point).

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::variant::ProtocolVariant;

/// Symbolic name of a device data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolicKey {
    PlayPause,
    Direction,
    WorkMode,
    WorkStatus,
    CleaningParameters,
    CleaningStatistics,
    AccessoriesStatus,
    GoHome,
    CleanSpeed,
    FindRobot,
    BatteryLevel,
    ErrorCode,
}

impl SymbolicKey {
    pub const ALL: [SymbolicKey; 12] = [
        Self::PlayPause,
        Self::Direction,
        Self::WorkMode,
        Self::WorkStatus,
        Self::CleaningParameters,
        Self::CleaningStatistics,
        Self::AccessoriesStatus,
        Self::GoHome,
        Self::CleanSpeed,
        Self::FindRobot,
        Self::BatteryLevel,
        Self::ErrorCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayPause => "PLAY_PAUSE",
            Self::Direction => "DIRECTION",
            Self::WorkMode => "WORK_MODE",
            Self::WorkStatus => "WORK_STATUS",
            Self::CleaningParameters => "CLEANING_PARAMETERS",
            Self::CleaningStatistics => "CLEANING_STATISTICS",
            Self::AccessoriesStatus => "ACCESSORIES_STATUS",
            Self::GoHome => "GO_HOME",
            Self::CleanSpeed => "CLEAN_SPEED",
            Self::FindRobot => "FIND_ROBOT",
            Self::BatteryLevel => "BATTERY_LEVEL",
            Self::ErrorCode => "ERROR_CODE",
        }
    }
}

impl std::fmt::Display for SymbolicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy-generation wire keys.
const LEGACY_TABLE: &[(SymbolicKey, &str)] = &[
    (SymbolicKey::PlayPause, "2"),
    (SymbolicKey::Direction, "3"),
    (SymbolicKey::WorkMode, "5"),
    (SymbolicKey::WorkStatus, "15"),
    (SymbolicKey::CleaningParameters, "154"),
    (SymbolicKey::CleaningStatistics, "167"),
    (SymbolicKey::AccessoriesStatus, "168"),
    (SymbolicKey::GoHome, "101"),
    (SymbolicKey::CleanSpeed, "102"),
    (SymbolicKey::FindRobot, "103"),
    (SymbolicKey::BatteryLevel, "104"),
    (SymbolicKey::ErrorCode, "106"),
];

/// Novel-generation wire keys. Work mode and work status share key 153.
const NOVEL_TABLE: &[(SymbolicKey, &str)] = &[
    (SymbolicKey::PlayPause, "152"),
    (SymbolicKey::Direction, "155"),
    (SymbolicKey::WorkMode, "153"),
    (SymbolicKey::WorkStatus, "153"),
    (SymbolicKey::CleaningParameters, "154"),
    (SymbolicKey::CleaningStatistics, "167"),
    (SymbolicKey::AccessoriesStatus, "168"),
    (SymbolicKey::GoHome, "173"),
    (SymbolicKey::CleanSpeed, "158"),
    (SymbolicKey::FindRobot, "160"),
    (SymbolicKey::BatteryLevel, "163"),
    (SymbolicKey::ErrorCode, "177"),
];

static LEGACY_BY_WIRE: Lazy<HashMap<&'static str, Vec<SymbolicKey>>> =
    Lazy::new(|| index_by_wire(LEGACY_TABLE));
static NOVEL_BY_WIRE: Lazy<HashMap<&'static str, Vec<SymbolicKey>>> =
    Lazy::new(|| index_by_wire(NOVEL_TABLE));
static NOVEL_WIRE_KEYS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| NOVEL_TABLE.iter().map(|(_, wire)| *wire).collect());

fn index_by_wire(table: &[(SymbolicKey, &'static str)]) -> HashMap<&'static str, Vec<SymbolicKey>> {
    let mut index: HashMap<&'static str, Vec<SymbolicKey>> = HashMap::new();
    for (symbolic, wire) in table {
        index.entry(wire).or_default().push(*symbolic);
    }
    index
}

fn table(variant: ProtocolVariant) -> &'static [(SymbolicKey, &'static str)] {
    match variant {
        ProtocolVariant::Novel => NOVEL_TABLE,
        // An undetected device reads as legacy until proven otherwise.
        ProtocolVariant::Legacy | ProtocolVariant::Unknown => LEGACY_TABLE,
    }
}

/// Wire key for a symbolic key under a variant.
pub fn wire_key(variant: ProtocolVariant, key: SymbolicKey) -> Option<&'static str> {
    table(variant)
        .iter()
        .find(|(symbolic, _)| *symbolic == key)
        .map(|(_, wire)| *wire)
}

/// Symbolic keys a wire key resolves to under a variant. Several
/// symbolic keys may share one wire key; the reverse is never true.
pub fn symbolic_keys(variant: ProtocolVariant, wire: &str) -> &'static [SymbolicKey] {
    let index = match variant {
        ProtocolVariant::Novel => &*NOVEL_BY_WIRE,
        ProtocolVariant::Legacy | ProtocolVariant::Unknown => &*LEGACY_BY_WIRE,
    };
    index.get(wire).map(Vec::as_slice).unwrap_or(&[])
}

/// Whether a wire key belongs to the novel key scheme.
pub fn is_novel_wire_key(wire: &str) -> bool {
    NOVEL_WIRE_KEYS.contains(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_key_lookup() {
        assert_eq!(
            wire_key(ProtocolVariant::Legacy, SymbolicKey::WorkStatus),
            Some("15")
        );
        assert_eq!(
            wire_key(ProtocolVariant::Novel, SymbolicKey::WorkStatus),
            Some("153")
        );
        assert_eq!(
            wire_key(ProtocolVariant::Novel, SymbolicKey::PlayPause),
            Some("152")
        );
    }

    #[test]
    fn test_unknown_variant_reads_as_legacy() {
        assert_eq!(
            wire_key(ProtocolVariant::Unknown, SymbolicKey::BatteryLevel),
            Some("104")
        );
    }

    #[test]
    fn test_shared_wire_key_resolves_to_all_symbolics() {
        let keys = symbolic_keys(ProtocolVariant::Novel, "153");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&SymbolicKey::WorkMode));
        assert!(keys.contains(&SymbolicKey::WorkStatus));

        assert_eq!(
            symbolic_keys(ProtocolVariant::Legacy, "15"),
            &[SymbolicKey::WorkStatus]
        );
        assert!(symbolic_keys(ProtocolVariant::Legacy, "999").is_empty());
    }

    #[test]
    fn test_every_symbolic_key_is_mapped_in_both_variants() {
        for key in SymbolicKey::ALL {
            assert!(wire_key(ProtocolVariant::Legacy, key).is_some(), "{key}");
            assert!(wire_key(ProtocolVariant::Novel, key).is_some(), "{key}");
        }
    }

    #[test]
    fn test_novel_key_set_membership() {
        assert!(is_novel_wire_key("152"));
        assert!(is_novel_wire_key("177"));
        assert!(!is_novel_wire_key("2"));
        assert!(!is_novel_wire_key("15"));
    }

    #[test]
    fn test_serde_names_match_wire_tables() {
        let json = serde_json::to_string(&SymbolicKey::PlayPause).unwrap();
        assert_eq!(json, "\"PLAY_PAUSE\"");
        let key: SymbolicKey = serde_json::from_str("\"BATTERY_LEVEL\"").unwrap();
        assert_eq!(key, SymbolicKey::BatteryLevel);
    }
}
