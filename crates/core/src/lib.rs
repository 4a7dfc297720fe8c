//! Chanlist core types: channels, paging cursor, list updates and snapshots.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod nav;

/// Stable channel identity as assigned by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(ChannelId)
    }
}

/// Channel category used by the type filter. The server sends it as a small integer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChannelType(pub u8);

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation channel as listed by the server.
///
/// Only `id`, `type` and `unreadMessagesCount` are interpreted; every other
/// field is carried through untouched in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub unread_messages_count: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Channel {
    pub fn new(id: i64, kind: u8) -> Self {
        Self { id: ChannelId(id), kind: ChannelType(kind), unread_messages_count: 0, extra: serde_json::Map::new() }
    }

    /// Builder-style helper for display fields.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// A copy of this channel with a different unread count; nothing else changes.
    pub fn with_unread(&self, unread_messages_count: u32) -> Self {
        Self { unread_messages_count, ..self.clone() }
    }

    /// `name` display field if present.
    pub fn name(&self) -> &str {
        self.extra.get("name").and_then(|v| v.as_str()).unwrap_or("")
    }
}

/// Narrows the listed channel types: `None` admits everything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct TypeFilter(pub Option<ChannelType>);

impl TypeFilter {
    pub const ALL: TypeFilter = TypeFilter(None);

    pub fn only(kind: ChannelType) -> Self { Self(Some(kind)) }

    pub fn admits(&self, channel: &Channel) -> bool {
        match self.0 {
            None => true,
            Some(kind) => channel.kind == kind,
        }
    }
}

impl From<Option<ChannelType>> for TypeFilter {
    fn from(v: Option<ChannelType>) -> Self { Self(v) }
}

/// Position in the paginated result sequence.
///
/// `total_pages` is refreshed from every page response; another page may be
/// requested only while `page_number < total_pages - 1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationCursor {
    pub page_number: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl PaginationCursor {
    pub fn new(page_size: u32) -> Self {
        Self { page_number: 0, page_size, total_pages: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.page_number.saturating_add(1) < self.total_pages
    }

    pub fn next(self) -> Self {
        Self { page_number: self.page_number.saturating_add(1), ..self }
    }

    pub fn first(self) -> Self {
        Self { page_number: 0, ..self }
    }

    pub fn with_total_pages(self, total_pages: u32) -> Self {
        Self { total_pages, ..self }
    }
}

/// Whether a fetched page replaces the list or extends it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadMode {
    Reset,
    Append,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScrollBehavior {
    Instant,
    Smooth,
}

/// Wire request for one page of account channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub search_field: String,
    pub page_number: u32,
    pub page_size: u32,
    pub channel_type: Option<ChannelType>,
}

/// Normalized page response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub channels: Vec<Channel>,
    pub total_pages: u32,
}

/// Push events folded into the list by the realtime bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    ChannelUpserted(Channel),
    ReadCountChanged { channel_id: ChannelId, unread_messages_count: u32 },
}

/// Tagged list mutation consumed by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate {
    /// Replace the list with page 0.
    Reset(Vec<Channel>),
    /// Extend the list with page N > 0.
    Append(Vec<Channel>),
    /// Move (or insert) a channel to the front.
    Upsert(Channel),
    /// Replace the unread count of one entry in place.
    Patch { id: ChannelId, unread_messages_count: u32 },
}

impl From<RealtimeEvent> for ListUpdate {
    fn from(ev: RealtimeEvent) -> Self {
        match ev {
            RealtimeEvent::ChannelUpserted(ch) => ListUpdate::Upsert(ch),
            RealtimeEvent::ReadCountChanged { channel_id, unread_messages_count } => {
                ListUpdate::Patch { id: channel_id, unread_messages_count }
            }
        }
    }
}

/// Immutable view of one list instance, published after every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListSnapshot {
    pub epoch: u64,
    pub channels: Vec<Channel>,
    pub cursor: PaginationCursor,
    pub loading: Option<LoadMode>,
    pub search_raw: String,
    pub search_committed: String,
    pub type_filter: TypeFilter,
}

impl ListSnapshot {
    pub fn empty(page_size: u32) -> Self {
        Self {
            epoch: 0,
            channels: Vec::new(),
            cursor: PaginationCursor::new(page_size),
            loading: None,
            search_raw: String::new(),
            search_committed: String::new(),
            type_filter: TypeFilter::ALL,
        }
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.id).collect()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

pub mod prelude {
    pub use super::{
        Channel, ChannelId, ChannelType, FetchRequest, ListSnapshot, ListUpdate, LoadMode,
        PageResult, PaginationCursor, RealtimeEvent, ScrollBehavior, TypeFilter,
    };
}
