// Salesforce Configuration
//
// Credentials are loaded from environment variables. The org type picks the
// variable prefix: SALESFORCE_B2B_, SALESFORCE_B2C_ or plain SALESFORCE_.

use crmarena_core::OrgType;
use std::env;

use crate::error::{Result, SalesforceError};

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
pub const DEFAULT_API_VERSION: &str = "59.0";

/// How to obtain an access token
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OAuth username-password flow against a connected app
    Password {
        login_url: String,
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
        security_token: String,
    },
    /// Already-issued session
    Session {
        instance_url: String,
        session_id: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password {
                login_url,
                username,
                ..
            } => f
                .debug_struct("Password")
                .field("login_url", login_url)
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::Session { instance_url, .. } => f
                .debug_struct("Session")
                .field("instance_url", instance_url)
                .field("session_id", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct SalesforceConfig {
    pub credentials: Credentials,
    /// REST API version without the leading `v`
    pub api_version: String,
}

impl SalesforceConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into().trim_start_matches('v').to_string();
        self
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (`{P}` is the org prefix):
    /// - `{P}_USERNAME`, `{P}_PASSWORD`, `{P}_SECURITY_TOKEN`: user credentials
    /// - `SALESFORCE_CLIENT_ID`, `SALESFORCE_CLIENT_SECRET`: connected app
    /// - `SALESFORCE_LOGIN_URL`: login host (default: https://login.salesforce.com)
    /// - `SALESFORCE_INSTANCE_URL`, `SALESFORCE_SESSION_ID`: pre-issued session,
    ///   used when no username is set
    /// - `SALESFORCE_API_VERSION`: REST API version (default: 59.0)
    pub fn from_env(org: OrgType) -> Result<Self> {
        Self::from_lookup(org, |name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup(org: OrgType, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let prefix = org_prefix(org);
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let require = |name: String| {
            get(&name).ok_or_else(|| {
                SalesforceError::config(format!("{name} environment variable not set"))
            })
        };

        let credentials = if let Some(username) = get(&format!("{prefix}_USERNAME")) {
            Credentials::Password {
                login_url: get("SALESFORCE_LOGIN_URL")
                    .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
                client_id: require("SALESFORCE_CLIENT_ID".to_string())?,
                client_secret: require("SALESFORCE_CLIENT_SECRET".to_string())?,
                username,
                password: require(format!("{prefix}_PASSWORD"))?,
                security_token: get(&format!("{prefix}_SECURITY_TOKEN")).unwrap_or_default(),
            }
        } else if let (Some(instance_url), Some(session_id)) = (
            get("SALESFORCE_INSTANCE_URL"),
            get("SALESFORCE_SESSION_ID"),
        ) {
            Credentials::Session {
                instance_url,
                session_id,
            }
        } else {
            return Err(SalesforceError::config(format!(
                "No Salesforce credentials found for org type '{}'",
                org.as_str()
            )));
        };

        let mut config = Self::new(credentials);
        if let Some(version) = get("SALESFORCE_API_VERSION") {
            config = config.with_api_version(version);
        }
        Ok(config)
    }
}

fn org_prefix(org: OrgType) -> &'static str {
    match org {
        OrgType::B2b => "SALESFORCE_B2B",
        OrgType::B2c => "SALESFORCE_B2C",
        OrgType::Original => "SALESFORCE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_b2b_password_credentials() {
        let config = SalesforceConfig::from_lookup(
            OrgType::B2b,
            vars(&[
                ("SALESFORCE_B2B_USERNAME", "agent@example.com"),
                ("SALESFORCE_B2B_PASSWORD", "pw"),
                ("SALESFORCE_B2B_SECURITY_TOKEN", "tok"),
                ("SALESFORCE_USERNAME", "someone-else@example.com"),
                ("SALESFORCE_CLIENT_ID", "cid"),
                ("SALESFORCE_CLIENT_SECRET", "secret"),
            ]),
        )
        .unwrap();

        match config.credentials {
            Credentials::Password {
                username,
                security_token,
                login_url,
                ..
            } => {
                assert_eq!(username, "agent@example.com");
                assert_eq!(security_token, "tok");
                assert_eq!(login_url, DEFAULT_LOGIN_URL);
            }
            other => panic!("expected password credentials, got {:?}", other),
        }
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_session_credentials_and_version() {
        let config = SalesforceConfig::from_lookup(
            OrgType::Original,
            vars(&[
                ("SALESFORCE_INSTANCE_URL", "https://acme.my.salesforce.com"),
                ("SALESFORCE_SESSION_ID", "00D!abc"),
                ("SALESFORCE_API_VERSION", "v61.0"),
            ]),
        )
        .unwrap();
        assert!(matches!(config.credentials, Credentials::Session { .. }));
        assert_eq!(config.api_version, "61.0");
    }

    #[test]
    fn test_missing_credentials() {
        let err = SalesforceConfig::from_lookup(OrgType::B2c, vars(&[])).unwrap_err();
        assert!(err.to_string().contains("b2c"));

        let err = SalesforceConfig::from_lookup(
            OrgType::B2c,
            vars(&[("SALESFORCE_B2C_USERNAME", "u"), ("SALESFORCE_B2C_PASSWORD", "p")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SALESFORCE_CLIENT_ID"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::Session {
            instance_url: "https://acme.my.salesforce.com".into(),
            session_id: "00D!secret".into(),
        };
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
