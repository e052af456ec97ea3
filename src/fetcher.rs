//! Account inventory fetcher.
//!
//! Pages through the inventory endpoint with offset/limit, stopping at the
//! first page shorter than the requested size, and normalizes every raw
//! record into an [`Account`].
//!
//! # Pagination
//!
//! [`Pages`] is a lazy, finite cursor over a [`PageSource`]. It yields one
//! page per call, ends after a short page, ends after the first error, and
//! can be [`restart`](Pages::restart)ed from offset 0. A failed page is
//! always surfaced as an error and never mistaken for the end of the data.
//!
//! # Response shapes
//!
//! A page is either a bare JSON array of account records or an envelope:
//!
//! ```json
//! { "ok": true, "data": { "email_accounts": [ ... ] } }
//! ```
//!
//! # Status normalization
//!
//! `is_smtp_success` / `is_imap_success` map to `smtp_ok` / `imap_ok`. A
//! missing, null, or non-boolean status field counts as connected, so an
//! account is only flagged when the API explicitly reports a failure.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::Account;

/// One page of raw records, fetched by offset and limit.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Value>, ApiError>;
}

/// Anything that can produce the full account list for a run.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Account>, ApiError>;
}

/// [`PageSource`] backed by the HTTP inventory endpoint.
pub struct InventoryApi {
    client: ApiClient,
    path: String,
}

impl InventoryApi {
    pub fn new(client: ApiClient, path: &str) -> Self {
        Self {
            client,
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl PageSource for InventoryApi {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Value>, ApiError> {
        let params = [("offset", offset.to_string()), ("limit", limit.to_string())];
        let body = self.client.get_json(&self.path, &params).await?;
        extract_records(body)
    }
}

/// Pull the record array out of a page response.
pub fn extract_records(body: Value) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => {
            if obj.get("ok").and_then(Value::as_bool) == Some(false) {
                let message = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                return Err(ApiError::Fatal(format!("API reported failure: {}", message)));
            }
            let records = obj
                .get_mut("data")
                .and_then(|d| d.get_mut("email_accounts"))
                .map(Value::take);
            match records {
                Some(Value::Array(records)) => Ok(records),
                _ => Err(ApiError::Fatal(
                    "malformed response: expected data.email_accounts array".to_string(),
                )),
            }
        }
        _ => Err(ApiError::Fatal(
            "malformed response: expected a JSON array or object".to_string(),
        )),
    }
}

/// Lazy cursor over the pages of a [`PageSource`].
pub struct Pages<'a> {
    source: &'a dyn PageSource,
    page_size: usize,
    offset: usize,
    done: bool,
}

impl<'a> Pages<'a> {
    pub fn new(source: &'a dyn PageSource, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            offset: 0,
            done: false,
        }
    }

    /// Fetch the next page, or `None` once the data is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<Vec<Value>, ApiError>> {
        if self.done {
            return None;
        }

        match self.source.fetch_page(self.offset, self.page_size).await {
            Ok(records) => {
                if records.len() < self.page_size {
                    self.done = true;
                }
                self.offset += records.len();
                if records.is_empty() {
                    None
                } else {
                    Some(Ok(records))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Rewind to the first page.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.done = false;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Fetches and normalizes the full inventory through a [`PageSource`].
pub struct InventoryFetcher<S> {
    source: S,
    page_size: usize,
}

impl<S: PageSource> InventoryFetcher<S> {
    pub fn new(source: S, page_size: usize) -> Self {
        Self { source, page_size }
    }
}

#[async_trait]
impl<S: PageSource> AccountSource for InventoryFetcher<S> {
    async fn fetch_all(&self) -> Result<Vec<Account>, ApiError> {
        let mut pages = Pages::new(&self.source, self.page_size);
        let mut accounts = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        let mut missing_status = 0usize;
        let mut page_no = 0usize;

        while let Some(page) = pages.next_page().await {
            let records = page.map_err(|e| {
                tracing::error!(page = page_no, offset = pages.offset(), error = %e, "page fetch failed");
                e
            })?;
            page_no += 1;

            for raw in &records {
                match normalize_account(raw) {
                    Some((account, status_complete)) => {
                        if !status_complete {
                            missing_status += 1;
                        }
                        // Offsets can shift between pages; keep the first copy.
                        if seen.insert(account.account_id) {
                            accounts.push(account);
                        }
                    }
                    None => skipped += 1,
                }
            }
            tracing::debug!(page = page_no, fetched = accounts.len(), "inventory page processed");
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped account records without an integer id");
        }
        if missing_status > 0 {
            tracing::warn!(
                missing_status,
                "account records with missing connection status were treated as connected"
            );
        }
        tracing::info!(accounts = accounts.len(), pages = page_no, "inventory fetched");

        Ok(accounts)
    }
}

/// Normalize one raw record.
///
/// Returns the account plus whether both status fields were present, or
/// `None` if the record has no usable id.
pub fn normalize_account(raw: &Value) -> Option<(Account, bool)> {
    let account_id = raw.get("id").and_then(Value::as_i64)?;

    let smtp = raw.get("is_smtp_success").and_then(Value::as_bool);
    let imap = raw.get("is_imap_success").and_then(Value::as_bool);

    let tags = raw
        .get("email_account_tag_mappings")
        .and_then(Value::as_array)
        .map(|mappings| {
            mappings
                .iter()
                .filter_map(|m| m.get("tag")?.get("name")?.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let client_id = match raw.get("client_id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let account = Account {
        account_id,
        from_name: string_field(raw, "from_name"),
        from_email: string_field(raw, "from_email"),
        account_type: raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
        smtp_ok: smtp.unwrap_or(true),
        imap_ok: imap.unwrap_or(true),
        tags,
        client_id,
        message_per_day: raw.get("message_per_day").and_then(Value::as_i64),
        daily_sent_count: raw.get("daily_sent_count").and_then(Value::as_i64),
    };

    Some((account, smtp.is_some() && imap.is_some()))
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves `total` synthetic records, optionally failing at one offset.
    struct FakeSource {
        total: usize,
        fail_at_offset: Option<usize>,
        requests: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeSource {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at_offset: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Value>, ApiError> {
            self.requests.lock().unwrap().push((offset, limit));
            if self.fail_at_offset == Some(offset) {
                return Err(ApiError::Fatal("giving up after 3 attempts: 503".to_string()));
            }
            let end = (offset + limit).min(self.total);
            Ok((offset..end)
                .map(|i| {
                    json!({
                        "id": i as i64 + 1,
                        "from_email": format!("user{}@example.com", i),
                        "is_smtp_success": i % 3 != 0,
                        "is_imap_success": true,
                    })
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_fetch_all_pages_until_short_page() {
        let fetcher = InventoryFetcher::new(FakeSource::new(25), 10);
        let accounts = fetcher.fetch_all().await.unwrap();
        assert_eq!(accounts.len(), 25);
        let requests = fetcher.source.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![(0, 10), (10, 10), (20, 10)]);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_page() {
        let fetcher = InventoryFetcher::new(FakeSource::new(20), 10);
        let accounts = fetcher.fetch_all().await.unwrap();
        assert_eq!(accounts.len(), 20);
        assert_eq!(fetcher.source.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_later_page_failure_is_an_error_not_end_of_data() {
        let mut source = FakeSource::new(35);
        source.fail_at_offset = Some(20);
        let fetcher = InventoryFetcher::new(source, 10);
        let err = fetcher.fetch_all().await.unwrap_err();
        assert!(matches!(err, ApiError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_pages_restart() {
        let source = FakeSource::new(15);
        let mut pages = Pages::new(&source, 10);
        assert_eq!(pages.next_page().await.unwrap().unwrap().len(), 10);
        assert_eq!(pages.next_page().await.unwrap().unwrap().len(), 5);
        assert!(pages.next_page().await.is_none());

        pages.restart();
        assert_eq!(pages.offset(), 0);
        assert_eq!(pages.next_page().await.unwrap().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_pages_stop_after_error() {
        let mut source = FakeSource::new(30);
        source.fail_at_offset = Some(0);
        let mut pages = Pages::new(&source, 10);
        assert!(pages.next_page().await.unwrap().is_err());
        assert!(pages.next_page().await.is_none());
    }

    #[test]
    fn test_normalize_full_record() {
        let raw = json!({
            "id": 4412,
            "from_name": "Dana",
            "from_email": "dana@example.com",
            "type": "SMTP",
            "is_smtp_success": false,
            "is_imap_success": true,
            "client_id": 77,
            "message_per_day": 40,
            "daily_sent_count": 12,
            "email_account_tag_mappings": [
                { "tag": { "id": 1, "name": "warmup" } },
                { "tag": { "id": 2 } },
                { "tag": { "id": 3, "name": "eu" } }
            ]
        });
        let (account, complete) = normalize_account(&raw).unwrap();
        assert!(complete);
        assert_eq!(account.account_id, 4412);
        assert!(!account.smtp_ok);
        assert!(account.imap_ok);
        assert_eq!(account.tags, vec!["warmup", "eu"]);
        assert_eq!(account.client_id.as_deref(), Some("77"));
        assert_eq!(account.message_per_day, Some(40));
    }

    #[test]
    fn test_missing_status_counts_as_connected() {
        let raw = json!({ "id": 9, "from_email": "x@example.com" });
        let (account, complete) = normalize_account(&raw).unwrap();
        assert!(!complete);
        assert!(!account.is_disconnected());
        assert_eq!(account.account_type, "UNKNOWN");

        let partial = json!({ "id": 10, "is_smtp_success": null, "is_imap_success": false });
        let (account, complete) = normalize_account(&partial).unwrap();
        assert!(!complete);
        assert!(account.smtp_ok);
        assert!(!account.imap_ok);
    }

    #[test]
    fn test_record_without_id_is_skipped() {
        assert!(normalize_account(&json!({ "from_email": "x@example.com" })).is_none());
        assert!(normalize_account(&json!({ "id": "abc" })).is_none());
    }

    #[test]
    fn test_extract_records_shapes() {
        let bare = json!([{ "id": 1 }, { "id": 2 }]);
        assert_eq!(extract_records(bare).unwrap().len(), 2);

        let envelope = json!({ "ok": true, "data": { "email_accounts": [{ "id": 1 }] } });
        assert_eq!(extract_records(envelope).unwrap().len(), 1);

        let failed = json!({ "ok": false, "message": "invalid api key" });
        let err = extract_records(failed).unwrap_err();
        assert!(err.to_string().contains("invalid api key"));

        assert!(extract_records(json!({ "data": {} })).is_err());
        assert!(extract_records(json!("nope")).is_err());
    }
}
