//! Protocol-variant detection.
//!
//! Two incompatible data-point key schemes are in the field. Which one a
//! device speaks is decided from its model code and from the wire keys it
//! has been observed emitting. The decision is monotone: once a device is
//! known to be novel it stays novel, whatever later updates look like.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dps;

/// Wire-protocol generation of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// Not yet decided; data points read as legacy until detection runs.
    #[default]
    Unknown,
    Legacy,
    Novel,
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Legacy => write!(f, "legacy"),
            Self::Novel => write!(f, "novel"),
        }
    }
}

/// Model codes known to speak the novel protocol regardless of what wire
/// keys have been seen so far.
pub const NOVEL_MODELS: &[&str] = &["X8", "X8PRO", "X9", "X9PRO", "X10", "X10PRO"];

/// Decide a variant from scratch.
///
/// Rule order matters: a known-novel model is terminal and skips the key
/// probe entirely, so a fresh device with an empty data-point map still
/// resolves correctly.
pub fn detect<'a>(model: &str, observed_wire_keys: impl IntoIterator<Item = &'a str>) -> ProtocolVariant {
    let model = model.trim().to_uppercase();
    if NOVEL_MODELS.contains(&model.as_str()) {
        return ProtocolVariant::Novel;
    }

    if observed_wire_keys
        .into_iter()
        .any(dps::is_novel_wire_key)
    {
        return ProtocolVariant::Novel;
    }

    ProtocolVariant::Legacy
}

/// Re-run detection against an existing decision, never downgrading.
///
/// Legacy may upgrade to Novel when novel keys appear later (some devices
/// emit legacy keys transiently before their first full novel payload);
/// Novel never reverts.
pub fn resolve<'a>(
    current: ProtocolVariant,
    model: &str,
    observed_wire_keys: impl IntoIterator<Item = &'a str>,
) -> ProtocolVariant {
    if current == ProtocolVariant::Novel {
        return ProtocolVariant::Novel;
    }

    let detected = detect(model, observed_wire_keys);
    if detected != current {
        debug!("variant for model {model}: {current} -> {detected}");
    }
    detected
}
