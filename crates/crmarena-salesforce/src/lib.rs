// Salesforce Backend
//
// Implements the QueryBackend capability from crmarena-core on top of the
// Salesforce REST API:
// - SOQL queries go through `queryAll` and follow `nextRecordsUrl` pages
// - SOSL searches (queries starting with FIND) go through `search`
// - Error payloads become `"CODE: message"` observations with status 0
//
// Authentication is the OAuth username-password flow or a pre-issued session.

mod auth;
mod config;
mod connector;
mod error;

pub use auth::{authenticate, Session};
pub use config::{Credentials, SalesforceConfig, DEFAULT_API_VERSION, DEFAULT_LOGIN_URL};
pub use connector::{SalesforceBackendFactory, SalesforceConnector};
pub use error::{Result, SalesforceError};
