// Salesforce authentication

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::error::{Result, SalesforceError};

/// Bearer token bound to the instance that issued it
#[derive(Clone)]
pub struct Session {
    pub instance_url: String,
    pub access_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange credentials for a session.
///
/// A pre-issued session is returned as is, without a network round trip.
pub async fn authenticate(client: &Client, credentials: &Credentials) -> Result<Session> {
    let (login_url, client_id, client_secret, username, password, security_token) =
        match credentials {
            Credentials::Session {
                instance_url,
                session_id,
            } => {
                return Ok(Session {
                    instance_url: instance_url.trim_end_matches('/').to_string(),
                    access_token: session_id.clone(),
                })
            }
            Credentials::Password {
                login_url,
                client_id,
                client_secret,
                username,
                password,
                security_token,
            } => (
                login_url,
                client_id,
                client_secret,
                username,
                password,
                security_token,
            ),
        };

    let url = format!("{}/services/oauth2/token", login_url.trim_end_matches('/'));
    debug!(url = %url, username = %username, "Requesting Salesforce access token");

    // The security token is appended to the password
    let password = format!("{password}{security_token}");
    let response = client
        .post(&url)
        .form(&[
            ("grant_type", "password"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("username", username.as_str()),
            ("password", password.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = match serde_json::from_str::<OAuthError>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => body,
        };
        warn!(status = status.as_u16(), "Salesforce login rejected");
        return Err(SalesforceError::Auth {
            status: status.as_u16(),
            message,
        });
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| SalesforceError::UnexpectedResponse(format!("token response: {e}")))?;
    Ok(Session {
        instance_url: token.instance_url.trim_end_matches('/').to_string(),
        access_token: token.access_token,
    })
}
