use std::time::Duration;

use async_trait::async_trait;
use crmchat_core::config::SalesforceConfig;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("salesforce credentials are not configured")]
    MissingCredentials,
    #[error("salesforce login failed with status {status}: {message}")]
    Login { status: u16, message: String },
    #[error("salesforce query failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("salesforce request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CrmError {
    /// Failures that mean no usable connection exists.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::MissingCredentials | Self::Login { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "totalSize", default)]
    pub total_size: u64,
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn query(&self, soql: &str) -> Result<QueryResult, CrmError>;
}

#[derive(Clone, Debug)]
struct Credentials {
    username: String,
    password: SecretString,
    security_token: Option<SecretString>,
    client_id: String,
    client_secret: SecretString,
}

#[derive(Clone, Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default, alias = "error_description")]
    message: String,
    #[serde(default, alias = "error")]
    #[serde(rename = "errorCode")]
    error_code: String,
}

/// Salesforce REST client using the OAuth username-password flow.
///
/// The session is cached and refreshed once when a query comes back 401.
pub struct SalesforceClient {
    client: Client,
    login_url: String,
    api_version: String,
    credentials: Credentials,
    session: Mutex<Option<LoginResponse>>,
}

impl SalesforceClient {
    pub fn from_config(config: &SalesforceConfig) -> Result<Self, CrmError> {
        if !config.has_credentials() {
            return Err(CrmError::MissingCredentials);
        }
        let (Some(username), Some(password), Some(client_id), Some(client_secret)) = (
            config.username.clone(),
            config.password.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ) else {
            return Err(CrmError::MissingCredentials);
        };

        let client =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            client,
            login_url: config.login_url(),
            api_version: config.api_version.clone(),
            credentials: Credentials {
                username,
                password,
                security_token: config.security_token.clone(),
                client_id,
                client_secret,
            },
            session: Mutex::new(None),
        })
    }

    /// Points login at a different host, e.g. a mock server.
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self
    }

    async fn login(&self) -> Result<LoginResponse, CrmError> {
        let credentials = &self.credentials;
        let mut password = credentials.password.expose_secret().to_string();
        if let Some(token) = &credentials.security_token {
            password.push_str(token.expose_secret());
        }

        let response = self
            .client
            .post(format!("{}/services/oauth2/token", self.login_url.trim_end_matches('/')))
            .form(&[
                ("grant_type", "password"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.expose_secret()),
                ("username", credentials.username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            warn!(
                event_name = "crm.salesforce.login_failed",
                status = status.as_u16(),
                message = %message,
                "salesforce login failed"
            );
            return Err(CrmError::Login { status: status.as_u16(), message });
        }

        let session: LoginResponse = response.json().await?;
        debug!(
            event_name = "crm.salesforce.logged_in",
            instance_url = %session.instance_url,
            "salesforce session established"
        );
        Ok(session)
    }

    async fn session(&self, refresh: bool) -> Result<LoginResponse, CrmError> {
        let mut cached = self.session.lock().await;
        if refresh {
            *cached = None;
        }
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }
        let session = self.login().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn run_query(
        &self,
        session: &LoginResponse,
        soql: &str,
    ) -> Result<reqwest::Response, CrmError> {
        let url = format!(
            "{}/services/data/{}/query",
            session.instance_url.trim_end_matches('/'),
            self.api_version
        );
        Ok(self
            .client
            .get(url)
            .bearer_auth(&session.access_token)
            .query(&[("q", soql)])
            .send()
            .await?)
    }
}

#[async_trait]
impl RecordSource for SalesforceClient {
    async fn query(&self, soql: &str) -> Result<QueryResult, CrmError> {
        let session = self.session(false).await?;
        let mut response = self.run_query(&session, soql).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(event_name = "crm.salesforce.session_expired", "refreshing salesforce session");
            let session = self.session(true).await?;
            response = self.run_query(&session, soql).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(CrmError::Api { status: status.as_u16(), message });
        }

        Ok(response.json().await?)
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    // The query API returns a list of errors; the token endpoint a single object.
    let parsed = serde_json::from_str::<Vec<ApiErrorBody>>(&body)
        .ok()
        .and_then(|errors| errors.into_iter().next())
        .or_else(|| serde_json::from_str::<ApiErrorBody>(&body).ok());

    match parsed {
        Some(error) if !error.message.is_empty() && !error.error_code.is_empty() => {
            format!("{}: {}", error.error_code, error.message)
        }
        Some(error) if !error.message.is_empty() => error.message,
        Some(error) if !error.error_code.is_empty() => error.error_code,
        _ if !body.trim().is_empty() => body,
        _ => status.to_string(),
    }
}
