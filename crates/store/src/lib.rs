//! Chanlist store: the list reconciler and its snapshot publisher.
//!
//! All list mutations go through [`reduce`]. [`Reconciler`] wraps it with the
//! paging cursor, active filter and search terms of one list instance, and
//! [`ListPublisher`] hands frozen snapshots to readers.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use chanlist_core::{
    Channel, ChannelId, ListSnapshot, ListUpdate, LoadMode, PageResult, PaginationCursor, TypeFilter,
};
use metrics::counter;
use rustc_hash::FxHashSet;
use tokio::sync::watch;
use tracing::debug;

/// Pure list transition: `(list, update) -> list`.
///
/// Ids stay unique whatever the sequence of updates. A fetched page never
/// displaces an entry already in the list, and repeated ids within one page
/// keep their first occurrence.
pub fn reduce(mut items: Vec<Channel>, update: ListUpdate) -> Vec<Channel> {
    match update {
        ListUpdate::Reset(page) => {
            let mut seen = FxHashSet::default();
            page.into_iter().filter(|c| seen.insert(c.id)).collect()
        }
        ListUpdate::Append(page) => {
            let mut seen: FxHashSet<ChannelId> = items.iter().map(|c| c.id).collect();
            items.reserve(page.len());
            for c in page {
                if seen.insert(c.id) {
                    items.push(c);
                } else {
                    debug!(id = %c.id, "reduce: skipping duplicate from appended page");
                }
            }
            items
        }
        ListUpdate::Upsert(channel) => {
            items.retain(|c| c.id != channel.id);
            items.insert(0, channel);
            items
        }
        ListUpdate::Patch { id, unread_messages_count } => {
            if let Some(idx) = items.iter().position(|c| c.id == id) {
                items[idx] = items[idx].with_unread(unread_messages_count);
            }
            items
        }
    }
}

/// Authoritative state of one list instance.
pub struct Reconciler {
    epoch: u64,
    items: Vec<Channel>,
    cursor: PaginationCursor,
    filter: TypeFilter,
    loading: Option<LoadMode>,
    search_raw: String,
    search_committed: String,
    // List and cursor as they were before the pending reset.
    before_reset: Option<(Vec<Channel>, PaginationCursor)>,
}

impl Reconciler {
    pub fn new(page_size: u32) -> Self {
        Self {
            epoch: 0,
            items: Vec::new(),
            cursor: PaginationCursor::new(page_size),
            filter: TypeFilter::ALL,
            loading: None,
            search_raw: String::new(),
            search_committed: String::new(),
            before_reset: None,
        }
    }

    pub fn items(&self) -> &[Channel] { &self.items }
    pub fn cursor(&self) -> PaginationCursor { self.cursor }
    pub fn filter(&self) -> TypeFilter { self.filter }
    pub fn loading(&self) -> Option<LoadMode> { self.loading }
    pub fn search_raw(&self) -> &str { &self.search_raw }
    pub fn search_committed(&self) -> &str { &self.search_committed }
    pub fn epoch(&self) -> u64 { self.epoch }

    fn touch(&mut self) {
        self.epoch = self.epoch.saturating_add(1);
    }

    /// Apply one tagged update to the list.
    pub fn apply(&mut self, update: ListUpdate) {
        let items = std::mem::take(&mut self.items);
        self.items = reduce(items, update);
        self.touch();
    }

    /// Rewind to page 0 and mark a reset load. `clear` empties the list right away.
    ///
    /// The previous list and cursor are kept until the reset resolves so a
    /// failed reset can put them back. A superseded append gives its page back
    /// first. No further page is offered until page 0 reports the new page count.
    pub fn begin_reset(&mut self, clear: bool) -> PaginationCursor {
        if self.loading == Some(LoadMode::Append) {
            self.cursor.page_number = self.cursor.page_number.saturating_sub(1);
        }
        if self.before_reset.is_none() {
            let items = if clear { std::mem::take(&mut self.items) } else { self.items.clone() };
            self.before_reset = Some((items, self.cursor));
        } else if clear {
            self.items.clear();
        }
        self.cursor = self.cursor.first().with_total_pages(0);
        self.loading = Some(LoadMode::Reset);
        self.touch();
        self.cursor
    }

    /// Advance to the next page if one remains.
    pub fn begin_append(&mut self) -> Option<PaginationCursor> {
        if !self.cursor.has_next() {
            return None;
        }
        self.cursor = self.cursor.next();
        self.loading = Some(LoadMode::Append);
        self.touch();
        Some(self.cursor)
    }

    /// Fold a successful page response in.
    pub fn finish_fetch(&mut self, mode: LoadMode, page: PageResult) {
        let PageResult { channels, total_pages } = page;
        let update = match mode {
            LoadMode::Reset => ListUpdate::Reset(channels),
            LoadMode::Append => ListUpdate::Append(channels),
        };
        if mode == LoadMode::Reset {
            self.before_reset = None;
        }
        self.loading = None;
        self.cursor = self.cursor.with_total_pages(total_pages);
        self.apply(update);
    }

    /// A failed fetch leaves the list as it was. An append gives its page back;
    /// a reset restores the list and cursor it started from.
    pub fn abort_fetch(&mut self, mode: LoadMode) {
        match mode {
            LoadMode::Append => self.cursor.page_number = self.cursor.page_number.saturating_sub(1),
            LoadMode::Reset => {
                if let Some((items, cursor)) = self.before_reset.take() {
                    self.items = items;
                    self.cursor = cursor;
                }
            }
        }
        self.loading = None;
        self.touch();
    }

    /// Realtime upsert, subject to the active type filter. Returns whether the list changed.
    pub fn upsert(&mut self, channel: Channel) -> bool {
        if !self.filter.admits(&channel) {
            counter!("chanlist_realtime_ignored_total", 1);
            debug!(id = %channel.id, kind = %channel.kind, "reconciler: upsert filtered out");
            return false;
        }
        counter!("chanlist_upserts_total", 1);
        self.amend_before_reset(ListUpdate::Upsert(channel.clone()));
        self.apply(ListUpdate::Upsert(channel));
        true
    }

    /// Realtime read-count patch. Returns whether an entry matched.
    pub fn patch(&mut self, id: ChannelId, unread_messages_count: u32) -> bool {
        self.amend_before_reset(ListUpdate::Patch { id, unread_messages_count });
        if !self.items.iter().any(|c| c.id == id) {
            debug!(id = %id, "reconciler: read count for unlisted channel");
            return false;
        }
        counter!("chanlist_patches_total", 1);
        self.apply(ListUpdate::Patch { id, unread_messages_count });
        true
    }

    // Realtime updates also land on the kept list, so a failed reset does not lose them.
    fn amend_before_reset(&mut self, update: ListUpdate) {
        if let Some((items, _)) = self.before_reset.as_mut() {
            *items = reduce(std::mem::take(items), update);
        }
    }

    pub fn set_filter(&mut self, filter: TypeFilter) -> bool {
        if self.filter == filter {
            return false;
        }
        self.filter = filter;
        self.touch();
        true
    }

    pub fn set_search_raw(&mut self, raw: &str) {
        if self.search_raw != raw {
            self.search_raw = raw.to_string();
            self.touch();
        }
    }

    /// Returns whether the committed term actually changed.
    pub fn set_search_committed(&mut self, term: &str) -> bool {
        if self.search_committed == term {
            return false;
        }
        self.search_committed = term.to_string();
        self.touch();
        true
    }

    pub fn freeze(&self) -> Arc<ListSnapshot> {
        Arc::new(ListSnapshot {
            epoch: self.epoch,
            channels: self.items.clone(),
            cursor: self.cursor,
            loading: self.loading,
            search_raw: self.search_raw.clone(),
            search_committed: self.search_committed.clone(),
            type_filter: self.filter,
        })
    }
}

/// Write side of the snapshot channel.
pub struct ListPublisher {
    snap: Arc<ArcSwap<ListSnapshot>>,
    epoch_tx: watch::Sender<u64>,
}

impl ListPublisher {
    pub fn publish(&self, next: Arc<ListSnapshot>) {
        let epoch = next.epoch;
        self.snap.store(next);
        let _ = self.epoch_tx.send(epoch);
    }
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
#[derive(Clone)]
pub struct ListReader {
    snap: Arc<ArcSwap<ListSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl ListReader {
    pub fn current(&self) -> Arc<ListSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

pub fn publisher(initial: ListSnapshot) -> (ListPublisher, ListReader) {
    let (epoch_tx, epoch_rx) = watch::channel(initial.epoch);
    let snap = Arc::new(ArcSwap::from_pointee(initial));
    (ListPublisher { snap: Arc::clone(&snap), epoch_tx }, ListReader { snap, epoch_rx })
}
