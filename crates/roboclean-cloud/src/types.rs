//! Session, device and credential types returned by the cloud backend.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base URLs for the three vendor API surfaces.
///
/// The account surface handles login, the directory surface lists devices,
/// and the appliance surface serves broker credentials and the
/// push-capable device relations. Overridable for test servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEndpoints {
    pub account_base: String,
    pub directory_base: String,
    pub appliance_base: String,
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self {
            account_base: "https://home-api.robolife.com/v1".to_string(),
            directory_base: "https://api.robolife.com/v1".to_string(),
            appliance_base: "https://aiot-clean-api.robolife.com/app".to_string(),
        }
    }
}

/// Authenticated session against the vendor backend.
///
/// `derived_token` is a one-way hash of `user_center_id` required by the
/// device and broker endpoints. It is recomputed on every refresh; the
/// hash is never stored apart from its source id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token from the login endpoint
    pub access_token: String,
    /// Account identifier from the user-context endpoint
    pub user_center_id: String,
    /// Token accepted by the device-management endpoints
    pub user_center_token: String,
    /// Hex MD5 digest of `user_center_id`
    pub derived_token: String,
    /// When the session was established
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// Compute the derived token for an account identifier.
    pub fn derive_token(user_center_id: &str) -> String {
        let digest = Md5::digest(user_center_id.as_bytes());
        format!("{digest:x}")
    }
}

/// A device as reported by the cloud directory, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudDevice {
    /// Serial number: the only cross-channel identity
    pub serial: String,
    /// Display name (alias if the account renamed it)
    pub name: String,
    /// Short model code, e.g. "X8"
    pub model: String,
    /// Whether the directory considers the device reachable
    pub online: bool,
    /// Raw wire-key/value data points attached to the listing
    #[serde(default)]
    pub data_points: HashMap<String, serde_json::Value>,
    /// Whether this record came from the push-capable relation listing
    #[serde(default)]
    pub push_capable: bool,
}

/// Credentials for the push broker, fetched once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCredentials {
    /// Broker hostname
    pub endpoint: String,
    /// Broker port (TLS)
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Application namespace the broker expects in client identifiers
    pub app_name: String,
    /// Broker-side identity, used as the MQTT username
    pub thing_name: String,
    /// Account identifier echoed into command envelopes
    pub user_id: String,
    /// PEM client certificate, present for certificate auth
    pub certificate_pem: Option<String>,
    /// PEM private key, present for certificate auth
    pub private_key_pem: Option<String>,
    /// PEM CA chain anchoring the broker's server certificate
    pub ca_pem: Option<String>,
    /// Shared secret, present for password auth
    pub auth_secret: Option<String>,
}

fn default_broker_port() -> u16 {
    8883
}

impl TransportCredentials {
    /// Certificate auth requires both halves of the key pair.
    pub fn has_client_certificate(&self) -> bool {
        self.certificate_pem.is_some() && self.private_key_pem.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_token_is_stable() {
        let a = Session::derive_token("user-center-1");
        let b = Session::derive_token("user-center-1");
        assert_eq!(a, b);
        // 128-bit digest as lowercase hex
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derive_token_differs_per_account() {
        assert_ne!(
            Session::derive_token("user-center-1"),
            Session::derive_token("user-center-2")
        );
    }

    #[test]
    fn test_certificate_detection() {
        let mut creds = TransportCredentials {
            endpoint: "broker.example.com".into(),
            port: 8883,
            app_name: "robo_home".into(),
            thing_name: "thing-1".into(),
            user_id: "acct-1".into(),
            certificate_pem: Some("CERT".into()),
            private_key_pem: Some("KEY".into()),
            ca_pem: None,
            auth_secret: None,
        };
        assert!(creds.has_client_certificate());

        creds.private_key_pem = None;
        assert!(!creds.has_client_certificate());
    }
}
