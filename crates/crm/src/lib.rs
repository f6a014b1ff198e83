//! Salesforce access for the CRM assistant.
//!
//! - `soql` builds the account and contact queries
//! - `salesforce` logs in with the OAuth password flow and runs queries
//! - `functions` exposes `fetch_accounts` / `fetch_contacts` as JSON-returning
//!   functions the hosted agent can call

pub mod functions;
pub mod salesforce;
pub mod soql;

pub use functions::{CrmFunctions, FetchAccountsArgs, FetchContactsArgs};
pub use salesforce::{CrmError, QueryResult, RecordSource, SalesforceClient};
