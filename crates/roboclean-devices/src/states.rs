//! Symbolic vacuum state vocabulary and normalization tables.
//!
//! Wire values for work status and mode differ per device generation;
//! these enums give the embedding application one vocabulary, with
//! normalization from the raw strings both generations emit.

use serde::{Deserialize, Serialize};

/// Normalized top-level vacuum state for external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacuumState {
    Stopped,
    Cleaning,
    SpotCleaning,
    Docked,
    Charging,
}

/// Work status as devices report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Running,
    Cleaning,
    Charging,
    Standby,
    Sleeping,
    Recharge,
    Completed,
    Fault,
    FastMapping,
    RemoteCtrl,
    GoHome,
    Cruising,
}

impl WorkStatus {
    /// Parse the raw strings both generations emit (case-insensitive,
    /// with the handful of historical aliases).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "cleaning" => Some(Self::Cleaning),
            "charging" | "recharge_charging" => Some(Self::Charging),
            "standby" | "stand_by" => Some(Self::Standby),
            "sleeping" | "sleep" => Some(Self::Sleeping),
            "recharge" | "recharge_needed" => Some(Self::Recharge),
            "completed" => Some(Self::Completed),
            "fault" => Some(Self::Fault),
            "fast_mapping" | "fast mapping" => Some(Self::FastMapping),
            "remote_ctrl" | "remote ctrl" => Some(Self::RemoteCtrl),
            "go_home" | "go home" => Some(Self::GoHome),
            "cruising" => Some(Self::Cruising),
            _ => None,
        }
    }

    /// Collapse a work status into the external vacuum state.
    pub fn vacuum_state(&self) -> VacuumState {
        match self {
            Self::Running | Self::Cleaning | Self::FastMapping | Self::RemoteCtrl
            | Self::Cruising => VacuumState::Cleaning,
            Self::Charging => VacuumState::Charging,
            Self::Standby | Self::Completed | Self::GoHome | Self::Recharge => VacuumState::Docked,
            Self::Sleeping | Self::Fault => VacuumState::Stopped,
        }
    }
}

/// Work mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    Auto,
    SmallRoom,
    Room,
    Zone,
    Edge,
    Spot,
    Nosweep,
}

impl WorkMode {
    /// Wire value the legacy generation expects.
    pub fn legacy_value(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::SmallRoom => "SmallRoom",
            Self::Room => "room",
            Self::Zone => "zone",
            Self::Edge => "Edge",
            Self::Spot => "Spot",
            Self::Nosweep => "Nosweep",
        }
    }
}

/// Suction level. The novel generation addresses speeds by table index,
/// the legacy one by name; both directions live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanSpeed {
    NoSuction,
    Standard,
    Quiet,
    Turbo,
    BoostIq,
    Max,
}

/// Speeds the novel generation supports, in wire-index order.
pub const NOVEL_CLEAN_SPEEDS: &[CleanSpeed] = &[
    CleanSpeed::Quiet,
    CleanSpeed::Standard,
    CleanSpeed::Turbo,
    CleanSpeed::Max,
];

impl CleanSpeed {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "no_suction" | "no suction" => Some(Self::NoSuction),
            "standard" => Some(Self::Standard),
            "quiet" => Some(Self::Quiet),
            "turbo" => Some(Self::Turbo),
            "boost_iq" | "boost iq" => Some(Self::BoostIq),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    /// Index into the novel speed table, if this speed exists there.
    pub fn novel_index(&self) -> Option<u8> {
        NOVEL_CLEAN_SPEEDS
            .iter()
            .position(|speed| speed == self)
            .map(|index| index as u8)
    }

    /// Resolve a novel wire index back to a speed.
    pub fn from_novel_index(index: u8) -> Option<Self> {
        NOVEL_CLEAN_SPEEDS.get(index as usize).copied()
    }

    /// Legacy wire value (the speed name).
    pub fn legacy_value(&self) -> &'static str {
        match self {
            Self::NoSuction => "No_suction",
            Self::Standard => "Standard",
            Self::Quiet => "Quiet",
            Self::Turbo => "Turbo",
            Self::BoostIq => "Boost_IQ",
            Self::Max => "Max",
        }
    }
}

/// Control verbs carried inside novel mode-control sub-messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlVerb {
    StartAutoClean,
    StartSelectRoomsClean,
    StartSpotClean,
    StartGohome,
    StartFastMapping,
    StopTask,
    PauseTask,
    ResumeTask,
    StopGohome,
}

/// Human-readable description of a device fault code.
///
/// The table covers the codes both generations share; unknown codes
/// surface as `None` and are reported numerically.
pub fn describe_error(code: u32) -> Option<&'static str> {
    let description = match code {
        0 => "none",
        1 => "crash buffer stuck",
        2 => "wheel stuck",
        3 => "side brush stuck",
        4 => "rolling brush stuck",
        5 => "trapped, clear obstacles",
        6 => "trapped, move machine",
        7 => "wheel overhanging",
        8 => "power low, shutdown",
        13 => "host tilted",
        14 => "no dust box",
        17 => "forbidden area detected",
        18 => "laser cover stuck",
        19 => "laser sensor stuck",
        2310 => "dustbin not installed",
        3013 => "water insufficient",
        4010 => "laser error",
        4011 => "laser blocked",
        5010 => "battery open circuit",
        5014 => "low battery shutdown",
        6010 => "clean water tank not installed",
        6020 => "dirty water tank not installed",
        _ => return None,
    };
    Some(description)
}
