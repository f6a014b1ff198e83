//! Display text for tool bubbles and citations.

use serde_json::Value;

use crate::events::Annotation;

pub const FETCH_ACCOUNTS: &str = "fetch_accounts";
pub const FETCH_CONTACTS: &str = "fetch_contacts";
pub const BING_GROUNDING: &str = "bing_grounding";

const SEARCH_QUERY_MARKER: &str = "?q=";

pub fn tool_title(tool_name: &str) -> String {
    match tool_name {
        FETCH_ACCOUNTS => "🏢 Fetching Salesforce Accounts".to_owned(),
        FETCH_CONTACTS => "👤 Fetching Salesforce Contacts".to_owned(),
        BING_GROUNDING => "🌐 Searching Web Sources".to_owned(),
        other => format!("🛠️ Tool: {other}"),
    }
}

/// Query text following the first `?q=` of a grounding request URL.
pub fn search_query(request_url: &str) -> Option<&str> {
    request_url
        .split_once(SEARCH_QUERY_MARKER)
        .map(|(_, query)| query)
        .filter(|query| !query.is_empty())
}

pub fn searching_label(query: &str) -> String {
    format!("Searching for '{query}'...")
}

pub fn format_citation(text: &str, title: &str, url: &str) -> String {
    format!("{text} [{title}]({url})")
}

/// Citation block appended after the delta text, or empty when the delta has
/// no url citations.
pub fn citation_block<'a>(annotations: impl IntoIterator<Item = &'a Annotation>) -> String {
    let citations = annotations
        .into_iter()
        .filter_map(|annotation| match annotation {
            Annotation::UrlCitation { text, url_citation } => {
                Some(format_citation(text, &url_citation.title, &url_citation.url))
            }
            Annotation::Other => None,
        })
        .collect::<Vec<_>>();

    if citations.is_empty() {
        String::new()
    } else {
        format!("\n{}", citations.join("\n"))
    }
}

struct RecordFunction {
    name: &'static str,
    plural: &'static str,
    counted: &'static str,
}

const RECORD_FUNCTIONS: [RecordFunction; 2] = [
    RecordFunction { name: FETCH_ACCOUNTS, plural: "accounts", counted: "account(s)" },
    RecordFunction { name: FETCH_CONTACTS, plural: "contacts", counted: "contact(s)" },
];

/// One-line outcome of a completed CRM function call, or `None` for functions
/// that do not get a bubble.
pub fn function_summary(function_name: &str, output: &Value) -> Option<String> {
    let function = RECORD_FUNCTIONS.iter().find(|function| function.name == function_name)?;

    if let Some(error) = output.get("error") {
        let message = match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        return Some(format!("Error fetching {}: {message}", function.plural));
    }

    let total = output.get("totalSize").and_then(Value::as_u64).unwrap_or(0);
    Some(format!("Found {total} {}.", function.counted))
}
