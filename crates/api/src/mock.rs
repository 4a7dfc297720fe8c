//! In-memory channel backend for tests and the demo CLI.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chanlist_core::{Channel, FetchRequest};

use crate::{ChannelTransport, TransportError, TransportReply};

/// Serves pages from a fixed catalogue, front of the vector first.
///
/// Scripted replies queued with [`MockTransport::push_reply`] are returned
/// before falling back to the catalogue.
#[derive(Default)]
pub struct MockTransport {
    channels: Mutex<Vec<Channel>>,
    replies: Mutex<VecDeque<Result<TransportReply, TransportError>>>,
    calls: Mutex<Vec<FetchRequest>>,
    latency: Option<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels: Mutex::new(channels), ..Self::default() }
    }

    /// `count` channels with ids `1..=count`, names `channel-001`.. and types cycling 0, 1, 2.
    pub fn seeded(count: usize) -> Self {
        let channels = (1..=count)
            .map(|i| Channel::new(i as i64, (i % 3) as u8).with_field("name", format!("channel-{:03}", i)))
            .collect();
        Self::new(channels)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_reply(&self, reply: Result<TransportReply, TransportError>) {
        lock(&self.replies).push_back(reply);
    }

    /// Put a channel at the front of the catalogue, replacing any with the same id.
    pub fn prepend(&self, channel: Channel) {
        let mut all = lock(&self.channels);
        all.retain(|c| c.id != channel.id);
        all.insert(0, channel);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<FetchRequest> {
        lock(&self.calls).clone()
    }

    fn serve(&self, request: &FetchRequest) -> TransportReply {
        let needle = request.search_field.trim().to_lowercase();
        let all = lock(&self.channels);
        let matching: Vec<&Channel> = all
            .iter()
            .filter(|c| request.channel_type.map_or(true, |t| c.kind == t))
            .filter(|c| needle.is_empty() || c.name().to_lowercase().contains(&needle))
            .collect();
        let size = request.page_size as usize;
        let pages_count = if size == 0 { 0 } else { matching.len().div_ceil(size) };
        let start = (request.page_number as usize).saturating_mul(size);
        let channels: Vec<&Channel> = matching.into_iter().skip(start).take(size).collect();
        TransportReply::ok(serde_json::json!({
            "channels": channels,
            "meta": { "pagesCount": pages_count },
        }))
    }
}

#[async_trait::async_trait]
impl ChannelTransport for MockTransport {
    async fn account_channels(&self, request: FetchRequest) -> Result<TransportReply, TransportError> {
        lock(&self.calls).push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = lock(&self.replies).pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(self.serve(&request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize;
    use chanlist_core::ChannelType;

    fn req(search: &str, page: u32, kind: Option<u8>) -> FetchRequest {
        FetchRequest { search_field: search.into(), page_number: page, page_size: 15, channel_type: kind.map(ChannelType) }
    }

    #[tokio::test]
    async fn pages_search_and_type_filter() {
        let mock = MockTransport::seeded(45);
        let last = normalize(mock.account_channels(req("", 2, None)).await.unwrap()).unwrap();
        assert_eq!(last.total_pages, 3);
        assert_eq!(last.channels.first().map(|c| c.id.0), Some(31));

        let typed = normalize(mock.account_channels(req("", 0, Some(1))).await.unwrap()).unwrap();
        assert!(typed.channels.iter().all(|c| c.kind == ChannelType(1)));
        assert_eq!(typed.total_pages, 1);

        let found = normalize(mock.account_channels(req("CHANNEL-04", 0, None)).await.unwrap()).unwrap();
        assert_eq!(found.channels.iter().map(|c| c.id.0).collect::<Vec<_>>(), vec![40, 41, 42, 43, 44, 45]);
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn scripted_reply_is_served_once() {
        let mock = MockTransport::seeded(3);
        mock.push_reply(Ok(TransportReply::client_message("slow down")));
        let first = mock.account_channels(req("", 0, None)).await.unwrap();
        assert_eq!(first, TransportReply::client_message("slow down"));
        let second = normalize(mock.account_channels(req("", 0, None)).await.unwrap()).unwrap();
        assert_eq!(second.channels.len(), 3);
    }
}
