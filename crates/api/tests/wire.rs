use std::sync::Arc;
use std::time::Duration;

use chanlist_api::{normalize, FetchError, MockTransport, PageFetcher, TransportReply};
use chanlist_core::{ChannelId, ChannelType, TypeFilter};

#[test]
fn backend_body_keeps_unknown_fields() {
    let raw = serde_json::json!({
        "channels": [
            { "id": 12, "type": 2, "name": "ops", "unreadMessagesCount": 3, "avatar": { "url": "a.png" } },
            { "id": 13, "type": 0, "name": "dev" }
        ],
        "meta": { "pagesCount": 5, "total": 61 }
    });
    let page = normalize(TransportReply::ok(raw)).unwrap();
    assert_eq!(page.total_pages, 5);
    let first = &page.channels[0];
    assert_eq!(first.id, ChannelId(12));
    assert_eq!(first.kind, ChannelType(2));
    assert_eq!(first.unread_messages_count, 3);
    assert_eq!(first.extra.get("avatar"), Some(&serde_json::json!({ "url": "a.png" })));
    assert_eq!(page.channels[1].unread_messages_count, 0);

    let back = serde_json::to_value(first).unwrap();
    assert_eq!(back["unreadMessagesCount"], 3);
    assert_eq!(back["type"], 2);
}

#[test]
fn error_envelope_from_json() {
    let reply: TransportReply = TransportReply {
        data: None,
        error: Some(serde_json::from_value(serde_json::json!({
            "errors": { "searchField": ["too long"] }
        })).unwrap()),
    };
    match normalize(reply) {
        Err(FetchError::Validation(fields)) => assert_eq!(fields.0["searchField"], vec!["too long".to_string()]),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_slow_fetch_releases_busy_flag() {
    let mock = Arc::new(MockTransport::seeded(30).with_latency(Duration::from_secs(5)));
    let fetcher = PageFetcher::new(mock.clone());
    let slow = fetcher.fetch_page("", 0, 15, TypeFilter::ALL);
    let res = tokio::time::timeout(Duration::from_secs(1), slow).await;
    assert!(res.is_err());
    assert!(!fetcher.is_busy());

    let page = fetcher.fetch_page("channel-02", 0, 15, TypeFilter::only(ChannelType(0))).await.unwrap();
    assert!(page.channels.iter().all(|c| c.kind == ChannelType(0) && c.name().starts_with("channel-02")));
    assert_eq!(mock.calls().len(), 2);
}
