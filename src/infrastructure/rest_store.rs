//! REST table store client
//!
//! Talks to the hosted app platform's REST API: OAuth client-credentials
//! token, paged table reads, row create/update, and the application →
//! data page listing used to enumerate items.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::errors::{StoreError, WriteError, WriteOperation};
use crate::domain::item::{Item, ItemKey};
use crate::domain::record::{CanonicalRecord, RecordField};
use crate::domain::repositories::{ItemSource, RecordStore};
use crate::infrastructure::config::{is_table_name, StoreConfig};

/// Every API response wraps its payload in `Result`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Result")]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Application {
    #[serde(rename = "AppName", default)]
    app_name: String,
    #[serde(rename = "ExternalKey")]
    external_key: String,
}

pub struct RestStoreClient {
    client: Client,
    base_url: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
    page_size: u32,
    token: Mutex<Option<String>>,
}

impl RestStoreClient {
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("Invalid store base URL: {base}"))?;
        let token_url = Url::parse(&config.token_url)
            .with_context(|| format!("Invalid token URL: {}", config.token_url))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("datapage-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            page_size: config.page_size,
            token: Mutex::new(None),
        })
    }

    /// Cached bearer token, fetched on first use
    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        debug!("Requesting access token from {}", self.token_url);
        let response = self
            .client
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| StoreError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Auth(format!("token response unreadable: {e}")))?;
        info!("🔑 Access token acquired");
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send with bearer auth; a 401 refreshes the token and retries once
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        for attempt in 0..2 {
            let token = self.access_token().await?;
            let response = build(&self.client)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("⚠️ Access token rejected, refreshing");
                self.invalidate_token().await;
                continue;
            }
            return check_status(response).await;
        }
        Err(StoreError::Auth("access token rejected twice".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, StoreError> {
        let response = self.send(|client| client.get(url.clone())).await?;
        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?
            .result
            .ok_or_else(|| StoreError::Decode("response has no Result".to_string()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        endpoint(&self.base_url, segments)
    }

    fn records_url(&self, table: &str) -> Result<Url, StoreError> {
        if !is_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        self.endpoint(&["tables", table, "records"])
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, StoreError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| StoreError::Transport(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `q.where` clause selecting a single row by key
fn key_filter(key: &ItemKey) -> String {
    format!(
        "{}='{}'",
        RecordField::Key.column(),
        key.as_str().replace('\'', "''")
    )
}

/// First application whose name contains `wanted`, ignoring case
fn select_application<'a>(apps: &'a [Application], wanted: &str) -> Option<&'a Application> {
    let wanted = wanted.to_lowercase();
    apps.iter()
        .find(|app| app.app_name.to_lowercase().contains(&wanted))
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Transport(format!("request timed out: {e}"))
    } else {
        StoreError::Transport(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(url));
    }
    Err(StoreError::Http {
        status: status.as_u16(),
        url,
        message,
    })
}

fn write_error(operation: WriteOperation, key: &ItemKey, error: StoreError) -> WriteError {
    let key = key.clone();
    match error {
        StoreError::Http {
            status, message, ..
        } => WriteError::Rejected {
            operation,
            key,
            status,
            message,
        },
        StoreError::NotFound(url) => WriteError::Rejected {
            operation,
            key,
            status: StatusCode::NOT_FOUND.as_u16(),
            message: url,
        },
        StoreError::Transport(reason) => WriteError::Unreachable {
            operation,
            key,
            reason,
        },
        other => WriteError::Backend {
            operation,
            key,
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl RecordStore for RestStoreClient {
    async fn load_snapshot(&self, table: &str) -> Result<Vec<CanonicalRecord>, StoreError> {
        let base = self.records_url(table)?;
        let mut records = Vec::new();

        for page in 1u32.. {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("q.pageSize", &self.page_size.to_string())
                .append_pair("q.pageNumber", &page.to_string());

            let rows: Vec<serde_json::Value> = self.get_json(url).await?;
            let fetched = rows.len();
            for row in rows {
                let record = serde_json::from_value(row)
                    .map_err(|e| StoreError::Decode(format!("{table} row: {e}")))?;
                records.push(record);
            }
            debug!("Snapshot page {} of {}: {} rows", page, table, fetched);

            if fetched < self.page_size as usize {
                break;
            }
        }
        Ok(records)
    }

    async fn create(&self, table: &str, record: &CanonicalRecord) -> Result<(), WriteError> {
        let operation = WriteOperation::Create;
        let mut url = self
            .records_url(table)
            .map_err(|e| write_error(operation, &record.key, e))?;
        url.query_pairs_mut().append_pair("response", "rows");

        self.send(|client| client.post(url.clone()).json(record))
            .await
            .map_err(|e| write_error(operation, &record.key, e))?;
        info!("📤 Created {} in {}", record.key, table);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        let operation = WriteOperation::Update;
        let mut url = self
            .records_url(table)
            .map_err(|e| write_error(operation, key, e))?;
        url.query_pairs_mut()
            .append_pair("response", "rows")
            .append_pair("q.where", &key_filter(key));

        self.send(|client| client.put(url.clone()).json(record))
            .await
            .map_err(|e| write_error(operation, key, e))?;
        info!("📝 Updated {} in {}", key, table);
        Ok(())
    }
}

#[async_trait]
impl ItemSource for RestStoreClient {
    async fn list_items(&self, app_name: &str) -> Result<Vec<Item>, StoreError> {
        let apps: Vec<Application> = self.get_json(self.endpoint(&["applications"])?).await?;
        let app = select_application(&apps, app_name)
            .ok_or_else(|| StoreError::NotFound(format!("application matching '{app_name}'")))?;
        info!("📚 Using application '{}' ({})", app.app_name, app.external_key);

        let url = self.endpoint(&["applications", &app.external_key, "datapages"])?;
        let items: Vec<Item> = self.get_json(url).await?;
        info!("📚 {} data pages listed", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str, key: &str) -> Application {
        Application {
            app_name: name.to_string(),
            external_key: key.to_string(),
        }
    }

    #[test]
    fn endpoints_keep_base_path() {
        let base = Url::parse("https://acct.example.com/rest/v2/").unwrap();
        let url = endpoint(&base, &["tables", "Pages", "records"]).unwrap();
        assert_eq!(url.as_str(), "https://acct.example.com/rest/v2/tables/Pages/records");
    }

    #[test]
    fn key_filter_escapes_quotes() {
        assert_eq!(key_filter(&ItemKey::new("abc")), "Caspio_App_Key='abc'");
        assert_eq!(key_filter(&ItemKey::new("o'k")), "Caspio_App_Key='o''k'");
    }

    #[test]
    fn application_match_is_case_insensitive_substring() {
        let apps = vec![
            app("Billing", "b1"),
            app("WorkMovr 4 Admin", "w4"),
            app("workmovr 4", "w5"),
        ];
        assert_eq!(
            select_application(&apps, "workMOVR 4").map(|a| a.external_key.as_str()),
            Some("w4")
        );
        assert!(select_application(&apps, "payroll").is_none());
    }

    #[test]
    fn envelope_decodes_items() {
        let body = r#"{"Result":[{"AppKey":"k1","Name":"Orders","Path":null}]}"#;
        let envelope: Envelope<Vec<Item>> = serde_json::from_str(body).unwrap();
        let items = envelope.result.unwrap();
        assert_eq!(items[0].key.as_str(), "k1");
    }

    #[test]
    fn envelope_without_result_decodes_to_none() {
        let envelope: Envelope<Vec<Item>> = serde_json::from_str(r#"{"Message":"ok"}"#).unwrap();
        assert!(envelope.result.is_none());

        let rows: Envelope<Vec<serde_json::Value>> = serde_json::from_str("{}").unwrap();
        assert!(rows.result.is_none());
    }

    #[test]
    fn store_errors_map_to_write_errors() {
        let key = ItemKey::new("k1");
        let rejected = write_error(
            WriteOperation::Create,
            &key,
            StoreError::Http {
                status: 400,
                url: "u".into(),
                message: "bad column".into(),
            },
        );
        assert!(matches!(rejected, WriteError::Rejected { status: 400, .. }));

        let unreachable =
            write_error(WriteOperation::Update, &key, StoreError::Transport("refused".into()));
        assert!(matches!(unreachable, WriteError::Unreachable { .. }));
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let config = StoreConfig {
            base_url: "https://acct.example.com/rest/v2".into(),
            token_url: "https://acct.example.com/oauth/token".into(),
            ..StoreConfig::default()
        };
        let client = RestStoreClient::from_config(&config).unwrap();
        assert!(matches!(
            client.records_url("Pages/../x"),
            Err(StoreError::InvalidTable(_))
        ));
        assert!(client
            .records_url("Pages")
            .unwrap()
            .as_str()
            .ends_with("/rest/v2/tables/Pages/records"));
    }
}
