//! Account authentication and session lifecycle.
//!
//! Login is a two-step handshake: the account endpoint trades email and
//! password for an access token, then the user-context endpoint resolves
//! the account identifier the device and broker surfaces key on. The
//! derived token is an MD5 hex digest of that identifier and is always
//! recomputed from it, never cached on its own.

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CloudError, CloudResult};
use crate::retry::with_backoff;
use crate::types::{CloudEndpoints, Session};
use roboclean_core::config::{defaults, AccountConfig};

/// OAuth-style client identity the account surface expects.
const APP_CLIENT_ID: &str = "robohome-app";
const APP_CLIENT_SECRET: &str = "kR7dqp3vVqNzM4wJc8TtbQ";
const USER_AGENT: &str = "RoboHome-Android-3.1.3";

/// Manages login and session refresh against the vendor backend.
pub struct SessionManager {
    client: Client,
    account: AccountConfig,
    endpoints: CloudEndpoints,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserContextResponse {
    user_center_id: Option<String>,
    user_center_token: Option<String>,
}

impl SessionManager {
    /// Create a manager with the default vendor endpoints.
    pub fn new(account: AccountConfig) -> Self {
        Self::with_endpoints(account, CloudEndpoints::default())
    }

    /// Create a manager against custom endpoints (test servers).
    pub fn with_endpoints(account: AccountConfig, endpoints: CloudEndpoints) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::REST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            account,
            endpoints,
        }
    }

    /// The shared HTTP client, reused by the directory component.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn endpoints(&self) -> &CloudEndpoints {
        &self.endpoints
    }

    /// Full login: authenticate, then resolve the account context.
    ///
    /// Credential rejections are fatal and surface immediately; transport
    /// failures are retried with bounded backoff.
    pub async fn login(&self) -> CloudResult<Session> {
        let access_token = with_backoff("login", || self.authenticate()).await?;
        let session = with_backoff("user context", || {
            self.refresh_user_context(&access_token)
        })
        .await?;
        info!("session established for {}", self.account.username);
        Ok(session)
    }

    /// Re-authenticate with the stored credentials, reusing the client.
    ///
    /// Used when a REST call reports the access token expired. Produces a
    /// fresh session; the derived token is recomputed from the account
    /// identifier, not copied from the stale session.
    pub async fn soft_login(&self, stale: &Session) -> CloudResult<Session> {
        debug!(
            "re-authenticating session issued at {}",
            stale.issued_at.to_rfc3339()
        );
        self.login().await
    }

    /// Fetch the account identity and assemble a full session.
    ///
    /// Exposed so callers can refresh a session's context without
    /// repeating the password exchange.
    pub async fn refresh_user_context(&self, access_token: &str) -> CloudResult<Session> {
        let url = format!("{}/user/user_center_info", self.endpoints.directory_base);

        let response = self
            .client
            .get(&url)
            .headers(self.directory_headers(access_token))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CloudError::InvalidCredentials(
                "access token rejected by user-context endpoint".into(),
            ));
        }

        let context: UserContextResponse = response.json().await?;
        let user_center_id = context.user_center_id.ok_or_else(|| {
            CloudError::MalformedResponse("user-context response missing user_center_id".into())
        })?;

        // Some accounts get a dedicated device-management token; the rest
        // keep using the login token.
        let user_center_token = context
            .user_center_token
            .unwrap_or_else(|| access_token.to_string());

        let derived_token = Session::derive_token(&user_center_id);
        debug!("user context resolved, center id {user_center_id}");

        Ok(Session {
            access_token: access_token.to_string(),
            user_center_id,
            user_center_token,
            derived_token,
            issued_at: Utc::now(),
        })
    }

    /// Exchange email and password for an access token.
    async fn authenticate(&self) -> CloudResult<String> {
        let url = format!("{}/user/email/login", self.endpoints.account_base);
        let payload = json!({
            "email": self.account.username,
            "password": self.account.password,
            "client_id": APP_CLIENT_ID,
            "client_secret": APP_CLIENT_SECRET,
        });

        let response = self
            .client
            .post(&url)
            .headers(self.account_headers())
            .json(&payload)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CloudError::InvalidCredentials(
                "login rejected with status 401".into(),
            ));
        }

        let body: LoginResponse = response.json().await?;
        match body.access_token {
            Some(token) => Ok(token),
            None => {
                let message = body.message.unwrap_or_else(|| "no error detail".into());
                // The backend reports bad credentials in-band rather than
                // with a status code.
                if is_credential_rejection(&message) {
                    Err(CloudError::InvalidCredentials(message))
                } else {
                    warn!("login refused without credential error: {message}");
                    Err(CloudError::Api(message))
                }
            }
        }
    }

    // Header names stay lowercase: `HeaderName::from_static` rejects
    // anything else, and the wire is case-insensitive anyway.
    fn account_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("category", HeaderValue::from_static("Home"));
        headers.insert("clienttype", HeaderValue::from_static("1"));
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        self.insert_locale_headers(&mut headers);
        headers
    }

    /// Headers for the directory surface, which authenticates with the
    /// raw access token.
    pub(crate) fn directory_headers(&self, access_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("category", HeaderValue::from_static("Home"));
        headers.insert("clienttype", HeaderValue::from_static("2"));
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        if let Ok(value) = HeaderValue::from_str(access_token) {
            headers.insert("token", value);
        }
        self.insert_locale_headers(&mut headers);
        headers
    }

    /// Headers for the appliance surface, which authenticates with the
    /// device-management token plus the derived token.
    pub(crate) fn appliance_headers(&self, session: &Session) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("app-name", HeaderValue::from_static("robo_home"));
        headers.insert("os-version", HeaderValue::from_static("Android"));
        headers.insert("model-type", HeaderValue::from_static("PHONE"));
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        if let Ok(value) = HeaderValue::from_str(&session.user_center_token) {
            headers.insert("x-auth-token", value);
        }
        if let Ok(value) = HeaderValue::from_str(&session.derived_token) {
            headers.insert("gtoken", value);
        }
        self.insert_locale_headers(&mut headers);
        headers
    }

    fn insert_locale_headers(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.account.client_udid) {
            headers.insert("openudid", value);
        }
        if let Ok(value) = HeaderValue::from_str(self.account.language()) {
            headers.insert("language", value);
        }
        if let Ok(value) = HeaderValue::from_str(self.account.country()) {
            headers.insert("country", value);
        }
    }
}

/// Whether an in-band error message points at the credentials themselves.
fn is_credential_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("password") || lower.contains("credential") || lower.contains("account")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(AccountConfig::new("user@example.com", "secret"))
    }

    #[test]
    fn test_credential_rejection_detection() {
        assert!(is_credential_rejection("Incorrect password"));
        assert!(is_credential_rejection("ACCOUNT does not exist"));
        assert!(!is_credential_rejection("service temporarily unavailable"));
    }

    #[test]
    fn test_directory_headers_carry_token() {
        let headers = manager().directory_headers("token-123");
        assert_eq!(headers.get("token").unwrap(), "token-123");
        assert_eq!(headers.get("clienttype").unwrap(), "2");
        assert_eq!(headers.get("language").unwrap(), "en");
        assert_eq!(headers.get("country").unwrap(), "US");
    }

    #[test]
    fn test_appliance_headers_carry_derived_token() {
        let session = Session {
            access_token: "at".into(),
            user_center_id: "center-1".into(),
            user_center_token: "uct".into(),
            derived_token: Session::derive_token("center-1"),
            issued_at: Utc::now(),
        };
        let headers = manager().appliance_headers(&session);
        assert_eq!(headers.get("x-auth-token").unwrap(), "uct");
        assert_eq!(
            headers.get("gtoken").unwrap().to_str().unwrap(),
            Session::derive_token("center-1")
        );
    }
}
