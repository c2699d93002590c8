// Salesforce REST connector
//
// One connector per episode. The factory logs in once and hands every
// connector the same session.

use async_trait::async_trait;
use crmarena_core::backend::{
    clean_records, format_backend_error, is_search_query, preprocess_query, BackendFactory,
    QueryBackend, QueryOutcome, Record, SharedBackend,
};
use crmarena_core::{EvalError, OrgType};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::{authenticate, Session};
use crate::config::SalesforceConfig;
use crate::error::{Result, SalesforceError};

/// QueryBackend over the Salesforce REST API
#[derive(Debug, Clone)]
pub struct SalesforceConnector {
    client: Client,
    session: Session,
    api_version: String,
}

impl SalesforceConnector {
    pub fn new(client: Client, session: Session, api_version: impl Into<String>) -> Self {
        Self {
            client,
            session,
            api_version: api_version.into(),
        }
    }

    /// Log in with the configured credentials and build a connector
    pub async fn connect(config: &SalesforceConfig) -> Result<Self> {
        let client = Client::new();
        let session = authenticate(&client, &config.credentials).await?;
        Ok(Self::new(client, session, config.api_version.clone()))
    }

    fn data_url(&self, resource: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            self.session.instance_url, self.api_version, resource
        )
    }

    /// GET a REST resource.
    ///
    /// The inner `Err` carries a backend-reported error, already formatted.
    async fn get(
        &self,
        url: &str,
        query: Option<&str>,
    ) -> Result<std::result::Result<Value, String>> {
        let mut request = self.client.get(url).bearer_auth(&self.session.access_token);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Ok(Err(format_backend_error(&body)));
        }
        serde_json::from_str(&body)
            .map(Ok)
            .map_err(|e| SalesforceError::UnexpectedResponse(e.to_string()))
    }

    /// Relational query, following result pages to the end
    async fn query_all(&self, soql: &str) -> Result<QueryOutcome> {
        let mut page = match self.get(&self.data_url("queryAll"), Some(soql)).await? {
            Ok(page) => page,
            Err(message) => return Ok(QueryOutcome::Error(message)),
        };

        let mut rows = Vec::new();
        loop {
            rows.extend(take_records(&mut page, "records"));

            let done = page.get("done").and_then(Value::as_bool).unwrap_or(true);
            let next = page.get("nextRecordsUrl").and_then(Value::as_str);
            match next {
                Some(next) if !done => {
                    let url = format!("{}{}", self.session.instance_url, next);
                    debug!(next = %next, fetched = rows.len(), "Fetching next result page");
                    page = match self.get(&url, None).await? {
                        Ok(page) => page,
                        Err(message) => return Ok(QueryOutcome::Error(message)),
                    };
                }
                _ => break,
            }
        }
        Ok(QueryOutcome::Rows(clean_records(rows)))
    }

    /// Full-text search
    async fn search(&self, sosl: &str) -> Result<QueryOutcome> {
        match self.get(&self.data_url("search"), Some(sosl)).await? {
            Ok(mut body) => {
                // Older API versions return the record list bare
                let rows = if body.is_array() {
                    into_records(body)
                } else {
                    take_records(&mut body, "searchRecords")
                };
                Ok(QueryOutcome::Rows(clean_records(rows)))
            }
            Err(message) => Ok(QueryOutcome::Error(message)),
        }
    }
}

fn take_records(body: &mut Value, key: &str) -> Vec<Record> {
    body.get_mut(key).map(Value::take).map(into_records).unwrap_or_default()
}

fn into_records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl QueryBackend for SalesforceConnector {
    async fn execute(&self, query: &str) -> crmarena_core::Result<QueryOutcome> {
        let search = is_search_query(query);
        let outcome = if search {
            self.search(query).await
        } else {
            self.query_all(&preprocess_query(query)).await
        }
        .map_err(EvalError::from)?;

        match &outcome {
            QueryOutcome::Rows(rows) => {
                debug!(search, rows = rows.len(), "Backend query succeeded")
            }
            QueryOutcome::Error(message) => {
                debug!(search, error = %message, "Backend query rejected")
            }
        }
        Ok(outcome)
    }
}

/// Hands out connectors that share one login
pub struct SalesforceBackendFactory {
    client: Client,
    config: SalesforceConfig,
    session: Mutex<Option<Session>>,
}

impl SalesforceBackendFactory {
    pub fn new(config: SalesforceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            session: Mutex::new(None),
        }
    }

    /// Factory for the credentials of one org type
    pub fn from_env(org: OrgType) -> Result<Self> {
        info!(org = org.as_str(), "Using Salesforce credentials");
        Ok(Self::new(SalesforceConfig::from_env(org)?))
    }
}

#[async_trait]
impl BackendFactory for SalesforceBackendFactory {
    async fn connect(&self) -> crmarena_core::Result<SharedBackend> {
        let mut cached = self.session.lock().await;
        let session = match cached.as_ref() {
            Some(session) => session.clone(),
            None => {
                let session = authenticate(&self.client, &self.config.credentials)
                    .await
                    .map_err(EvalError::from)?;
                info!(instance = %session.instance_url, "Connected to Salesforce");
                *cached = Some(session.clone());
                session
            }
        };

        Ok(Arc::new(SalesforceConnector::new(
            self.client.clone(),
            session,
            self.config.api_version.clone(),
        )))
    }
}

impl std::fmt::Debug for SalesforceBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceBackendFactory")
            .field("config", &self.config)
            .finish()
    }
}
