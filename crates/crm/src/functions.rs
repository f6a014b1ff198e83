//! Account and contact lookups as agent-callable functions.
//!
//! Every call returns a JSON string, including failures, because the output is
//! handed back to the hosted agent verbatim.

use std::sync::Arc;

use crmchat_core::config::SalesforceConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{field, info_span, warn, Instrument, Span};

use crate::salesforce::{CrmError, QueryResult, RecordSource, SalesforceClient};
use crate::soql::{self, DEFAULT_LIMIT};

pub const CONNECTION_FAILED: &str = "Failed to connect to Salesforce";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FetchAccountsArgs {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub name_filter: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FetchContactsArgs {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub name_filter: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for FetchAccountsArgs {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, name_filter: None }
    }
}

impl Default for FetchContactsArgs {
    fn default() -> Self {
        Self { account_id: None, limit: DEFAULT_LIMIT, name_filter: None }
    }
}

/// CRM functions backed by an optional record source. Without a source every
/// call reports a connection failure.
#[derive(Clone, Default)]
pub struct CrmFunctions {
    source: Option<Arc<dyn RecordSource>>,
}

impl CrmFunctions {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source: Some(source) }
    }

    pub fn disconnected() -> Self {
        Self { source: None }
    }

    /// Connects to Salesforce when credentials are configured. Otherwise the
    /// functions stay callable and report a connection failure.
    pub fn from_config(config: &SalesforceConfig) -> Self {
        match SalesforceClient::from_config(config) {
            Ok(client) => Self::new(Arc::new(client)),
            Err(error) => {
                warn!(
                    event_name = "crm.client.unavailable",
                    error = %error,
                    "salesforce is not connected; crm functions will report failures"
                );
                Self::disconnected()
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    pub async fn fetch_accounts(&self, args: &FetchAccountsArgs) -> String {
        let span = info_span!(
            "fetch_accounts",
            limit = args.limit,
            name_filter = field::Empty,
            soql_query = field::Empty,
            record_count = field::Empty,
            error = field::Empty,
        );
        if let Some(name_filter) = &args.name_filter {
            span.record("name_filter", name_filter.as_str());
        }

        let query = soql::accounts_query(args.limit, args.name_filter.as_deref());
        self.run("accounts", query, clean_record).instrument(span).await
    }

    pub async fn fetch_contacts(&self, args: &FetchContactsArgs) -> String {
        let span = info_span!(
            "fetch_contacts",
            limit = args.limit,
            account_id = field::Empty,
            name_filter = field::Empty,
            soql_query = field::Empty,
            record_count = field::Empty,
            error = field::Empty,
        );
        if let Some(account_id) = &args.account_id {
            span.record("account_id", account_id.as_str());
        }
        if let Some(name_filter) = &args.name_filter {
            span.record("name_filter", name_filter.as_str());
        }

        let query = soql::contacts_query(
            args.account_id.as_deref(),
            args.limit,
            args.name_filter.as_deref(),
        );
        self.run("contacts", query, clean_contact).instrument(span).await
    }

    async fn run(
        &self,
        collection: &str,
        query: String,
        clean: fn(Map<String, Value>) -> Map<String, Value>,
    ) -> String {
        let span = Span::current();
        let Some(source) = &self.source else {
            span.record("error", CONNECTION_FAILED);
            return error_output(CONNECTION_FAILED);
        };

        span.record("soql_query", query.as_str());
        match source.query(&query).await {
            Ok(QueryResult { total_size, records }) => {
                span.record("record_count", records.len());
                let records = records.into_iter().map(clean).map(Value::Object).collect::<Vec<_>>();
                let mut output = Map::new();
                output.insert(collection.to_owned(), Value::Array(records));
                output.insert("totalSize".to_owned(), json!(total_size));
                Value::Object(output).to_string()
            }
            Err(error) => {
                warn!(
                    event_name = "crm.query.failed",
                    collection,
                    error = %error,
                    "salesforce query failed"
                );
                let message = connection_aware_message(&error);
                span.record("error", message.as_str());
                error_output(&message)
            }
        }
    }
}

fn connection_aware_message(error: &CrmError) -> String {
    if error.is_connection_failure() {
        CONNECTION_FAILED.to_owned()
    } else {
        error.to_string()
    }
}

fn error_output(message: &str) -> String {
    json!({ "error": message }).to_string()
}

fn clean_record(record: Map<String, Value>) -> Map<String, Value> {
    record.into_iter().filter(|(key, value)| key != "attributes" && !value.is_null()).collect()
}

fn clean_contact(mut record: Map<String, Value>) -> Map<String, Value> {
    if let Some(account) = record.remove("Account") {
        if let Some(name) = account.get("Name").filter(|name| !name.is_null()) {
            record.insert("AccountName".to_owned(), name.clone());
        }
    }
    clean_record(record)
}
