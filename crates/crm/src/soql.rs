pub const DEFAULT_LIMIT: u32 = 10;

const ACCOUNT_FIELDS: &str =
    "Id, Name, Industry, Type, BillingCity, BillingState, BillingCountry, Phone, Website";
const CONTACT_FIELDS: &str = "Id, FirstName, LastName, Email, Phone, Title, AccountId, Account.Name";

/// Escapes a value for use inside a single-quoted SOQL string literal.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn accounts_query(limit: u32, name_filter: Option<&str>) -> String {
    let mut query = format!("SELECT {ACCOUNT_FIELDS} FROM Account");
    if let Some(filter) = non_empty(name_filter) {
        query.push_str(&format!(" WHERE Name LIKE '%{}%'", escape_literal(filter)));
    }
    query.push_str(&format!(" ORDER BY CreatedDate DESC LIMIT {limit}"));
    query
}

pub fn contacts_query(account_id: Option<&str>, limit: u32, name_filter: Option<&str>) -> String {
    let mut query = format!("SELECT {CONTACT_FIELDS} FROM Contact");

    let mut clauses = Vec::new();
    if let Some(account_id) = non_empty(account_id) {
        clauses.push(format!("AccountId = '{}'", escape_literal(account_id)));
    }
    if let Some(filter) = non_empty(name_filter) {
        let filter = escape_literal(filter);
        clauses.push(format!("(FirstName LIKE '%{filter}%' OR LastName LIKE '%{filter}%')"));
    }
    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }

    query.push_str(&format!(" ORDER BY CreatedDate DESC LIMIT {limit}"));
    query
}
