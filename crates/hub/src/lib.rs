//! Chanlist realtime bridge.
//!
//! A [`HubConnection`] is the process-wide push connection: handlers are
//! registered and removed by method name. A [`RealtimeSubscription`] binds the
//! two channel-list methods to one list instance for as long as it lives.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chanlist_core::{Channel, ChannelId, RealtimeEvent, TypeFilter};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Push methods the channel list listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubMethod {
    /// Payload: a full channel.
    ChannelUpserted,
    /// Payload: `{ channelId, unreadMessagesCount }`.
    ReadCountChanged,
}

impl HubMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubMethod::ChannelUpserted => "ChannelRes",
            HubMethod::ReadCountChanged => "ReadChannelRes",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadCountPayload {
    pub channel_id: ChannelId,
    pub unread_messages_count: u32,
}

pub type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Named-handler push connection shared by every list instance.
pub struct HubConnection {
    id: u64,
    next_handler: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl Default for HubConnection {
    fn default() -> Self { Self::new() }
}

impl HubConnection {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed),
            next_handler: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Distinguishes one connection from its replacement.
    pub fn id(&self) -> u64 { self.id }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Vec<(HandlerId, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on(&self, method: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.table().entry(method.to_string()).or_default().push((id, handler));
        debug!(conn = self.id, method, handler = id.0, "hub: handler registered");
        id
    }

    /// Remove one handler. Removing an unknown id is a no-op and returns false.
    pub fn off(&self, method: &str, id: HandlerId) -> bool {
        let mut table = self.table();
        let Some(list) = table.get_mut(method) else { return false; };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(method);
        }
        if removed {
            debug!(conn = self.id, method, handler = id.0, "hub: handler removed");
        }
        removed
    }

    pub fn handler_count(&self, method: &str) -> usize {
        self.table().get(method).map_or(0, |l| l.len())
    }

    /// Deliver a payload to every handler of `method` in registration order.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, method: &str, payload: &serde_json::Value) -> usize {
        // Call outside the lock so handlers may register or remove handlers.
        let handlers: Vec<Handler> = self
            .table()
            .get(method)
            .map(|l| l.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for h in &handlers {
            h(payload);
        }
        handlers.len()
    }

    /// Server-side helper: push a channel upsert.
    pub fn push_channel(&self, channel: &Channel) -> usize {
        match serde_json::to_value(channel) {
            Ok(v) => self.dispatch(HubMethod::ChannelUpserted.as_str(), &v),
            Err(e) => {
                warn!(error = %e, "hub: cannot encode channel");
                0
            }
        }
    }

    /// Server-side helper: push a read-count change.
    pub fn push_read_count(&self, channel_id: ChannelId, unread_messages_count: u32) -> usize {
        match serde_json::to_value(ReadCountPayload { channel_id, unread_messages_count }) {
            Ok(v) => self.dispatch(HubMethod::ReadCountChanged.as_str(), &v),
            Err(e) => {
                warn!(error = %e, "hub: cannot encode read count");
                0
            }
        }
    }
}

/// Both list handlers registered on one connection; dropping it removes them.
pub struct RealtimeSubscription {
    conn: Arc<HubConnection>,
    filter: TypeFilter,
    upsert: HandlerId,
    read: HandlerId,
}

impl RealtimeSubscription {
    /// Register handlers that forward parsed events into `sink`.
    ///
    /// Upserts whose type is not admitted by `filter` are dropped here.
    pub fn subscribe(
        conn: Arc<HubConnection>,
        filter: TypeFilter,
        sink: mpsc::UnboundedSender<RealtimeEvent>,
    ) -> Self {
        let upsert_sink = sink.clone();
        let upsert = conn.on(
            HubMethod::ChannelUpserted.as_str(),
            Arc::new(move |payload: &serde_json::Value| {
                let channel = match Channel::deserialize(payload) {
                    Ok(c) => c,
                    Err(e) => {
                        counter!("chanlist_realtime_malformed_total", 1);
                        warn!(error = %e, "hub: dropping unparseable channel event");
                        return;
                    }
                };
                if !filter.admits(&channel) {
                    counter!("chanlist_realtime_ignored_total", 1);
                    debug!(id = %channel.id, kind = %channel.kind, "hub: channel event outside filter");
                    return;
                }
                let _ = upsert_sink.send(RealtimeEvent::ChannelUpserted(channel));
            }),
        );
        let read = conn.on(
            HubMethod::ReadCountChanged.as_str(),
            Arc::new(move |payload: &serde_json::Value| {
                match ReadCountPayload::deserialize(payload) {
                    Ok(p) => {
                        let _ = sink.send(RealtimeEvent::ReadCountChanged {
                            channel_id: p.channel_id,
                            unread_messages_count: p.unread_messages_count,
                        });
                    }
                    Err(e) => {
                        counter!("chanlist_realtime_malformed_total", 1);
                        warn!(error = %e, "hub: dropping unparseable read-count event");
                    }
                }
            }),
        );
        debug!(conn = conn.id(), filter = ?filter.0, "hub: list subscribed");
        Self { conn, filter, upsert, read }
    }

    pub fn connection_id(&self) -> u64 { self.conn.id() }
    pub fn filter(&self) -> TypeFilter { self.filter }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.conn.off(HubMethod::ChannelUpserted.as_str(), self.upsert);
        self.conn.off(HubMethod::ReadCountChanged.as_str(), self.read);
        debug!(conn = self.conn.id(), "hub: list unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanlist_core::ChannelType;
    use std::sync::atomic::AtomicUsize;

    fn drain(rx: &mut mpsc::UnboundedReceiver<RealtimeEvent>) -> Vec<RealtimeEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn dispatch_runs_handlers_in_registration_order() {
        let conn = HubConnection::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let log = Arc::clone(&log);
            conn.on("m", Arc::new(move |_: &serde_json::Value| log.lock().unwrap().push(n)));
        }
        assert_eq!(conn.dispatch("m", &serde_json::Value::Null), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(conn.dispatch("other", &serde_json::Value::Null), 0);
    }

    #[test]
    fn off_is_idempotent() {
        let conn = HubConnection::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = conn.on("m", Arc::new(move |_: &serde_json::Value| { h.fetch_add(1, Ordering::SeqCst); }));
        assert!(conn.off("m", id));
        assert!(!conn.off("m", id));
        conn.dispatch("m", &serde_json::Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(conn.handler_count("m"), 0);
    }

    #[test]
    fn subscription_forwards_and_unsubscribes_on_drop() {
        let conn = Arc::new(HubConnection::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = RealtimeSubscription::subscribe(Arc::clone(&conn), TypeFilter::ALL, tx);
        assert_eq!(conn.handler_count(HubMethod::ChannelUpserted.as_str()), 1);
        assert_eq!(conn.handler_count(HubMethod::ReadCountChanged.as_str()), 1);

        let ch = Channel::new(3, 1).with_field("name", "ops");
        conn.push_channel(&ch);
        conn.push_read_count(ChannelId(3), 5);
        assert_eq!(
            drain(&mut rx),
            vec![
                RealtimeEvent::ChannelUpserted(ch.clone()),
                RealtimeEvent::ReadCountChanged { channel_id: ChannelId(3), unread_messages_count: 5 },
            ]
        );

        drop(sub);
        assert_eq!(conn.handler_count(HubMethod::ChannelUpserted.as_str()), 0);
        assert_eq!(conn.handler_count(HubMethod::ReadCountChanged.as_str()), 0);
        conn.push_channel(&ch);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn filtered_subscription_ignores_other_types() {
        let conn = Arc::new(HubConnection::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = RealtimeSubscription::subscribe(Arc::clone(&conn), TypeFilter::only(ChannelType(2)), tx);
        assert_eq!(sub.filter(), TypeFilter::only(ChannelType(2)));
        assert_eq!(sub.connection_id(), conn.id());
        conn.push_channel(&Channel::new(1, 1));
        conn.push_channel(&Channel::new(2, 2));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RealtimeEvent::ChannelUpserted(c) if c.id == ChannelId(2)));
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let conn = Arc::new(HubConnection::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = RealtimeSubscription::subscribe(Arc::clone(&conn), TypeFilter::ALL, tx);
        conn.dispatch(HubMethod::ChannelUpserted.as_str(), &serde_json::json!({ "name": "no id" }));
        conn.dispatch(HubMethod::ReadCountChanged.as_str(), &serde_json::json!("garbage"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn connections_have_distinct_ids() {
        assert_ne!(HubConnection::new().id(), HubConnection::new().id());
    }
}
