//! Remote tabular-store collaborator: a small get/append/patch surface over
//! ordered tables of named columns, plus retry classification and backoff for
//! the rate limits the remote imposes.
//!
//! The merge engine is the only writer against a given table and never issues
//! overlapping writes, so the trait is deliberately tiny: read a snapshot,
//! append rows at the tail, patch individual cells. Anything fancier belongs
//! to out-of-band administration, not to this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "rcl-store";

/// Snapshot of one remote table: a header row plus ordered data rows.
/// Rows may be ragged (shorter than the header); [`Table::cell`] reads
/// missing trailing cells as empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(title: impl Into<String>, header: Vec<&str>) -> Self {
        Self {
            title: title.into(),
            header: header.into_iter().map(str::to_string).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<&str>) {
        self.rows.push(row.into_iter().map(str::to_string).collect());
    }

    /// Trimmed cell value; short rows read as empty rather than panicking.
    pub fn cell(&self, row_index: usize, column_index: usize) -> &str {
        self.rows
            .get(row_index)
            .and_then(|row| row.get(column_index))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

/// One targeted cell write. `row` is 1-based (row 1 is the header, so data
/// patches always carry `row >= 2`); `column` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPatch {
    pub row: usize,
    pub column: usize,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The remote signalled a rate-limit / quota condition.
    #[error("rate limited by remote store")]
    RateLimited,
    /// Transient server-side failure (5xx). Like [`StoreError::RateLimited`]
    /// this is retryable with backoff; every other variant is not.
    #[error("transient server error {status} from remote store")]
    Unavailable { status: u16 },
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("http status {status} from remote store: {detail}")]
    Http { status: u16, detail: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited | StoreError::Unavailable { .. }
        )
    }
}

/// The read/append/patch surface the engine consumes. Appends land at the
/// current tail of the table in the order given and never reorder existing
/// rows.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn read_table(&self, title: &str) -> Result<Table, StoreError>;
    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<(), StoreError>;
    async fn apply_patches(&self, title: &str, patches: &[CellPatch]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Map a non-success response to a store error. 429 and quota-message
/// responses are rate limits, other retryable statuses surface as transient
/// server failures, everything else is a plain HTTP failure.
pub fn response_error(status: StatusCode, detail: String) -> StoreError {
    if status == StatusCode::TOO_MANY_REQUESTS || detail.to_ascii_lowercase().contains("quota") {
        return StoreError::RateLimited;
    }
    match classify_status(status) {
        RetryDisposition::Retryable => StoreError::Unavailable {
            status: status.as_u16(),
        },
        RetryDisposition::NonRetryable => StoreError::Http {
            status: status.as_u16(),
            detail,
        },
    }
}

/// Exponential backoff with a hard ceiling. Attempt 0 waits `base_delay`,
/// each further attempt doubles, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// In-memory store used by tests and dry runs. Tracks how many append and
/// patch calls were issued so batching behavior can be asserted, and can be
/// armed to fail the next N write calls with [`StoreError::RateLimited`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreState>,
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    tables: HashMap<String, Table>,
    append_calls: usize,
    patch_calls: usize,
    rate_limit_next: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_table(&self, table: Table) {
        let mut state = self.inner.lock().await;
        state.tables.insert(table.title.clone(), table);
    }

    pub async fn table(&self, title: &str) -> Option<Table> {
        self.inner.lock().await.tables.get(title).cloned()
    }

    pub async fn append_calls(&self) -> usize {
        self.inner.lock().await.append_calls
    }

    pub async fn patch_calls(&self) -> usize {
        self.inner.lock().await.patch_calls
    }

    /// Make the next `n` write calls fail with `RateLimited` before
    /// succeeding again. Reads are never throttled.
    pub async fn rate_limit_next_writes(&self, n: usize) {
        self.inner.lock().await.rate_limit_next = n;
    }
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn read_table(&self, title: &str) -> Result<Table, StoreError> {
        let state = self.inner.lock().await;
        state
            .tables
            .get(title)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(title.to_string()))
    }

    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        if state.rate_limit_next > 0 {
            state.rate_limit_next -= 1;
            return Err(StoreError::RateLimited);
        }
        state.append_calls += 1;
        let table = state
            .tables
            .get_mut(title)
            .ok_or_else(|| StoreError::TableNotFound(title.to_string()))?;
        table.rows.extend(rows.iter().cloned());
        Ok(())
    }

    async fn apply_patches(&self, title: &str, patches: &[CellPatch]) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        if state.rate_limit_next > 0 {
            state.rate_limit_next -= 1;
            return Err(StoreError::RateLimited);
        }
        state.patch_calls += 1;
        let table = state
            .tables
            .get_mut(title)
            .ok_or_else(|| StoreError::TableNotFound(title.to_string()))?;
        for patch in patches {
            if patch.row < 2 {
                return Err(StoreError::Other(anyhow::anyhow!(
                    "refusing to patch header row of {title}"
                )));
            }
            let row_index = patch.row - 2;
            let row = table.rows.get_mut(row_index).ok_or_else(|| {
                StoreError::Other(anyhow::anyhow!(
                    "patch addresses row {} beyond end of {title}",
                    patch.row
                ))
            })?;
            if row.len() <= patch.column {
                row.resize(patch.column + 1, String::new());
            }
            row[patch.column] = patch.value.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SheetClientConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub bearer_token: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl SheetClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_url: std::env::var("RCL_SHEETS_BASE_URL")
                .unwrap_or_else(|_| "https://sheets.googleapis.com/v4/spreadsheets".to_string()),
            spreadsheet_id: std::env::var("RCL_SPREADSHEET_ID")
                .context("RCL_SPREADSHEET_ID is not set")?,
            bearer_token: std::env::var("RCL_SHEETS_TOKEN")
                .context("RCL_SHEETS_TOKEN is not set")?,
            timeout: Duration::from_secs(
                std::env::var("RCL_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            user_agent: std::env::var("RCL_USER_AGENT")
                .unwrap_or_else(|_| "rcl-bot/0.1".to_string()),
        })
    }
}

/// HTTP-backed [`TabularStore`] speaking the spreadsheet values API.
/// Blocking-style per call (one request, bounded timeout); retries live in
/// the engine, not here, so a rate-limit response surfaces immediately as
/// [`StoreError::RateLimited`].
#[derive(Debug, Clone)]
pub struct SheetClient {
    http: reqwest::Client,
    config: Arc<SheetClientConfig>,
}

impl SheetClient {
    pub fn new(config: SheetClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn values_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.config.base_url, self.config.spreadsheet_id, suffix
        )
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        let err = response_error(status, detail);
        if err.is_retryable() {
            debug!(%status, "retryable response from remote store");
        }
        Err(err)
    }

    fn column_letter(mut index: usize) -> String {
        let mut out = String::new();
        index += 1;
        while index > 0 {
            let rem = (index - 1) % 26;
            out.insert(0, (b'A' + rem as u8) as char);
            index = (index - 1) / 26;
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[async_trait]
impl TabularStore for SheetClient {
    async fn read_table(&self, title: &str) -> Result<Table, StoreError> {
        let url = self.values_url(title);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await?;
        let response = self.check(response).await?;
        let body: ValuesResponse = response.json().await?;
        let mut values = body.values;
        if values.is_empty() {
            return Err(StoreError::TableNotFound(title.to_string()));
        }
        let header = values.remove(0);
        Ok(Table {
            title: title.to_string(),
            header,
            rows: values,
        })
    }

    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.values_url(title)
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bearer_token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn apply_patches(&self, title: &str, patches: &[CellPatch]) -> Result<(), StoreError> {
        if patches.is_empty() {
            return Ok(());
        }
        let data: Vec<_> = patches
            .iter()
            .map(|p| {
                let cell = format!("{}!{}{}", title, Self::column_letter(p.column), p.row);
                json!({ "range": cell, "values": [[p.value]] })
            })
            .collect();
        let url = format!(
            "{}/{}/values:batchUpdate",
            self.config.base_url, self.config.spreadsheet_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bearer_token)
            .json(&json!({ "valueInputOption": "RAW", "data": data }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}
