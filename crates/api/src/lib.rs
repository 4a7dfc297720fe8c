//! Chanlist page fetching.
//!
//! The HTTP client itself stays outside this crate. It is reached through
//! [`ChannelTransport`], and [`PageFetcher`] turns raw replies into a
//! [`PageResult`] or a [`FetchError`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chanlist_core::{Channel, FetchRequest, PageResult, TypeFilter};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod mock;

pub use mock::MockTransport;

/// Field-level validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, msgs) in &self.0 {
            for m in msgs {
                if !first { f.write_str("; ")?; }
                write!(f, "{}: {}", field, m)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Page fetch failures. None of them touch the list.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum FetchError {
    /// Application-level message meant for display.
    #[error("{0}")]
    ClientMessage(String),
    #[error("validation: {0}")]
    Validation(FieldErrors),
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The request itself was rejected before any reply arrived.
    #[error("transport: {0}")]
    Transport(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self { FetchError::Transport(e.0) }
}

/// Error body the server sends alongside (or instead of) data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

/// Raw transport outcome: a body, an error payload, both, or neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportReply {
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorPayload>,
}

impl TransportReply {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { data: Some(data), error: None }
    }

    pub fn client_message(msg: impl Into<String>) -> Self {
        Self { data: None, error: Some(ErrorPayload { client_message: Some(msg.into()), errors: None }) }
    }

    pub fn field_errors(errors: FieldErrors) -> Self {
        Self { data: None, error: Some(ErrorPayload { client_message: None, errors: Some(errors) }) }
    }
}

/// `{ channels, meta: { pagesCount } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountChannelsResponse {
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub pages_count: u32,
}

/// Turn a transport reply into a page.
///
/// A client message wins over field errors. Either one wins over any body
/// that came along with it.
pub fn normalize(reply: TransportReply) -> FetchResult<PageResult> {
    if let Some(err) = reply.error {
        if let Some(msg) = err.client_message {
            return Err(FetchError::ClientMessage(msg));
        }
        if let Some(errors) = err.errors {
            return Err(FetchError::Validation(errors));
        }
    }
    let data = reply.data.ok_or_else(|| FetchError::Malformed("response body missing".into()))?;
    let body: AccountChannelsResponse =
        serde_json::from_value(data).map_err(|e| FetchError::Malformed(e.to_string()))?;
    Ok(PageResult { channels: body.channels.unwrap_or_default(), total_pages: body.meta.pages_count })
}

/// Opaque request function to the channel backend.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn account_channels(&self, request: FetchRequest) -> Result<TransportReply, TransportError>;
}

/// Holds the busy count up while alive.
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn acquire(busy: Arc<AtomicUsize>) -> Self {
        busy.fetch_add(1, Ordering::AcqRel);
        Self(busy)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Issues page queries and tracks whether one is in flight.
#[derive(Clone)]
pub struct PageFetcher {
    transport: Arc<dyn ChannelTransport>,
    busy: Arc<AtomicUsize>,
}

impl PageFetcher {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self { transport, busy: Arc::new(AtomicUsize::new(0)) }
    }

    /// Same transport, separate busy flag. Clones share one flag.
    pub fn detached(&self) -> Self {
        Self { transport: Arc::clone(&self.transport), busy: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) > 0
    }

    /// Query one page.
    ///
    /// The busy flag is raised before this returns, not on first poll, and
    /// drops when the future completes or is dropped.
    pub fn fetch_page(
        &self,
        search_term: &str,
        page_number: u32,
        page_size: u32,
        filter: TypeFilter,
    ) -> impl Future<Output = FetchResult<PageResult>> + Send + 'static {
        let guard = BusyGuard::acquire(Arc::clone(&self.busy));
        let transport = Arc::clone(&self.transport);
        let request = FetchRequest {
            search_field: search_term.to_string(),
            page_number,
            page_size,
            channel_type: filter.0,
        };
        async move {
            let _guard = guard;
            let t0 = Instant::now();
            info!(page = request.page_number, search = %request.search_field, kind = ?request.channel_type, "fetch: page start");
            let res = match transport.account_channels(request).await {
                Ok(reply) => normalize(reply),
                Err(e) => Err(FetchError::from(e)),
            };
            let took_ms = t0.elapsed().as_secs_f64() * 1000.0;
            histogram!("chanlist_fetch_ms", took_ms);
            match &res {
                Ok(page) => info!(items = page.channels.len(), total_pages = page.total_pages, took_ms = %t0.elapsed().as_millis(), "fetch: page ok"),
                Err(e) => {
                    counter!("chanlist_fetch_failures_total", 1);
                    warn!(error = %e, took_ms = %t0.elapsed().as_millis(), "fetch: page failed");
                }
            }
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanlist_core::{ChannelId, ChannelType};

    fn body(ids: &[i64], pages: u32) -> serde_json::Value {
        let channels: Vec<_> = ids.iter().map(|i| serde_json::json!({ "id": i, "type": 0 })).collect();
        serde_json::json!({ "channels": channels, "meta": { "pagesCount": pages } })
    }

    #[test]
    fn normalize_ok() {
        let page = normalize(TransportReply::ok(body(&[1, 2], 4))).unwrap();
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.channels.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ChannelId(1), ChannelId(2)]);
    }

    #[test]
    fn null_channels_is_empty_page() {
        let page = normalize(TransportReply::ok(serde_json::json!({ "channels": null, "meta": { "pagesCount": 0 } }))).unwrap();
        assert!(page.channels.is_empty());
    }

    #[test]
    fn client_message_takes_precedence() {
        let reply = TransportReply {
            data: Some(body(&[1], 1)),
            error: Some(ErrorPayload {
                client_message: Some("not allowed".into()),
                errors: Some(FieldErrors::default()),
            }),
        };
        assert_eq!(normalize(reply), Err(FetchError::ClientMessage("not allowed".into())));
    }

    #[test]
    fn field_errors_are_validation() {
        let mut map = BTreeMap::new();
        map.insert("pageSize".to_string(), vec!["must be positive".to_string()]);
        let err = normalize(TransportReply::field_errors(FieldErrors(map))).unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
        assert_eq!(err.to_string(), "validation: pageSize: must be positive");
    }

    #[test]
    fn missing_or_bad_body_is_malformed() {
        assert_eq!(
            normalize(TransportReply::default()),
            Err(FetchError::Malformed("response body missing".into()))
        );
        let err = normalize(TransportReply::ok(serde_json::json!({ "channels": [] }))).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn busy_flag_spans_the_call_and_clears_on_failure() {
        let mock = Arc::new(MockTransport::seeded(20));
        mock.push_reply(Err(TransportError("connection reset".into())));
        let fetcher = PageFetcher::new(mock.clone());
        assert!(!fetcher.is_busy());

        let fut = fetcher.fetch_page("", 0, 15, TypeFilter::ALL);
        assert!(fetcher.is_busy());
        let res = fut.await;
        assert_eq!(res, Err(FetchError::Transport("connection reset".into())));
        assert!(!fetcher.is_busy());

        let fut = fetcher.fetch_page("", 0, 15, TypeFilter::only(ChannelType(1)));
        drop(fut);
        assert!(!fetcher.is_busy());
    }

    #[test]
    fn detached_fetcher_has_its_own_busy_flag() {
        let fetcher = PageFetcher::new(Arc::new(MockTransport::seeded(5)));
        let shared = fetcher.clone();
        let own = fetcher.detached();
        let _pending = fetcher.fetch_page("", 0, 15, TypeFilter::ALL);
        assert!(shared.is_busy());
        assert!(!own.is_busy());
    }

    #[tokio::test]
    async fn request_carries_all_parameters() {
        let mock = Arc::new(MockTransport::seeded(40));
        let fetcher = PageFetcher::new(mock.clone());
        let page = fetcher.fetch_page("", 1, 15, TypeFilter::ALL).await.unwrap();
        assert_eq!(page.channels.len(), 15);
        assert_eq!(page.total_pages, 3);
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], FetchRequest { search_field: String::new(), page_number: 1, page_size: 15, channel_type: None });
    }
}
