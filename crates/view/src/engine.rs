use std::sync::Arc;
use std::time::Instant;

use chanlist_api::{FetchError, FetchResult, PageFetcher};
use chanlist_core::nav::chat_path;
use chanlist_core::{ChannelId, ListSnapshot, LoadMode, PageResult, RealtimeEvent, ScrollBehavior, TypeFilter};
use chanlist_hub::{HubConnection, RealtimeSubscription};
use chanlist_store::{publisher, ListPublisher, ListReader, Reconciler};
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::counter;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ListConfig;
use crate::debounce::SearchInput;
use crate::sentinel::{ScrollMetrics, ScrollSentinel};

enum Command {
    Search(String),
    Filter(TypeFilter),
    Scroll(ScrollMetrics),
    ChannelCreated,
    Connection(Option<Arc<HubConnection>>),
    Shutdown,
}

/// Notifications for the surrounding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// A reset started; the list container should scroll to the top.
    ScrollToTop(ScrollBehavior),
    /// A page fetch failed. The list was left as it was.
    FetchFailed { mode: LoadMode, error: FetchError },
    /// The router should open this path.
    Navigate(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("channel list is closed")]
    Closed,
}

struct InFlight {
    mode: LoadMode,
    page: u32,
    started: Instant,
    fut: BoxFuture<'static, FetchResult<PageResult>>,
}

async fn next_fetch(slot: &mut Option<InFlight>) -> (LoadMode, FetchResult<PageResult>) {
    match slot {
        Some(f) => {
            let res = f.fut.as_mut().await;
            debug!(mode = ?f.mode, page = f.page, took_ms = %f.started.elapsed().as_millis(), "list: fetch resolved");
            (f.mode, res)
        }
        None => std::future::pending().await,
    }
}

/// Single-task owner of one list instance.
struct Engine {
    fetcher: PageFetcher,
    sentinel: ScrollSentinel,
    search: SearchInput,
    state: Reconciler,
    publisher: ListPublisher,
    events: broadcast::Sender<ViewEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    realtime_tx: mpsc::UnboundedSender<RealtimeEvent>,
    realtime_rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    connection: Option<Arc<HubConnection>>,
    subscription: Option<RealtimeSubscription>,
    in_flight: Option<InFlight>,
}

impl Engine {
    async fn run(mut self) {
        info!(page_size = self.state.cursor().page_size, filter = ?self.state.filter().0, "list: started");
        self.resubscribe();
        self.start_reset(ScrollBehavior::Instant, true);
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                term = self.search.next_commit() => self.on_commit(term),
                Some(ev) = self.realtime_rx.recv() => self.on_realtime(ev),
                (mode, res) = next_fetch(&mut self.in_flight) => self.on_fetch_done(mode, res),
            }
        }
        // Late responses die with the dropped future.
        self.in_flight = None;
        self.subscription = None;
        info!(items = self.state.items().len(), "list: stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Search(text) => {
                self.state.set_search_raw(&text);
                self.search.type_text(text);
                self.publish();
            }
            Command::Filter(filter) => {
                if self.state.set_filter(filter) {
                    info!(filter = ?filter.0, "list: type filter changed");
                    self.resubscribe();
                    self.start_reset(ScrollBehavior::Instant, true);
                }
            }
            Command::Scroll(metrics) => {
                let busy = self.fetcher.is_busy();
                if !self.sentinel.should_request(&metrics, &self.state.cursor(), busy) {
                    return;
                }
                if let Some(cursor) = self.state.begin_append() {
                    debug!(page = cursor.page_number, remaining = metrics.remaining(), "list: near bottom, loading next page");
                    self.issue(LoadMode::Append, cursor.page_number);
                }
            }
            Command::ChannelCreated => {
                info!("list: channel created, refreshing");
                self.start_reset(ScrollBehavior::Smooth, false);
            }
            Command::Connection(conn) => {
                let same = match (&self.connection, &conn) {
                    (Some(a), Some(b)) => a.id() == b.id(),
                    (None, None) => true,
                    _ => false,
                };
                if same {
                    return;
                }
                info!(conn = ?conn.as_ref().map(|c| c.id()), "list: connection changed");
                self.connection = conn;
                self.resubscribe();
            }
            Command::Shutdown => {}
        }
    }

    fn on_commit(&mut self, term: String) {
        if self.state.set_search_committed(&term) {
            info!(search = %term, "list: search committed");
            self.start_reset(ScrollBehavior::Instant, true);
        }
    }

    fn on_realtime(&mut self, ev: RealtimeEvent) {
        // The reconciler re-checks the filter: events queued before a filter
        // change still carry the old subscription's decision.
        let changed = match ev {
            RealtimeEvent::ChannelUpserted(channel) => self.state.upsert(channel),
            RealtimeEvent::ReadCountChanged { channel_id, unread_messages_count } => {
                self.state.patch(channel_id, unread_messages_count)
            }
        };
        if changed {
            self.publish();
        }
    }

    fn on_fetch_done(&mut self, mode: LoadMode, res: FetchResult<PageResult>) {
        self.in_flight = None;
        match res {
            Ok(page) => self.state.finish_fetch(mode, page),
            Err(error) => {
                warn!(mode = ?mode, error = %error, "list: fetch failed, keeping current list");
                self.state.abort_fetch(mode);
                let _ = self.events.send(ViewEvent::FetchFailed { mode, error });
            }
        }
        self.publish();
    }

    fn start_reset(&mut self, behavior: ScrollBehavior, clear: bool) {
        if let Some(prev) = self.in_flight.take() {
            counter!("chanlist_fetch_superseded_total", 1);
            debug!(mode = ?prev.mode, page = prev.page, "list: dropping superseded fetch");
        }
        counter!("chanlist_resets_total", 1);
        let cursor = self.state.begin_reset(clear);
        let _ = self.events.send(ViewEvent::ScrollToTop(behavior));
        self.issue(LoadMode::Reset, cursor.page_number);
    }

    fn issue(&mut self, mode: LoadMode, page: u32) {
        let cursor = self.state.cursor();
        let fut = self
            .fetcher
            .fetch_page(self.state.search_committed(), page, cursor.page_size, self.state.filter())
            .boxed();
        self.in_flight = Some(InFlight { mode, page, started: Instant::now(), fut });
        self.publish();
    }

    fn resubscribe(&mut self) {
        // Old handlers go before new ones are added.
        self.subscription = None;
        if let Some(conn) = &self.connection {
            self.subscription = Some(RealtimeSubscription::subscribe(
                Arc::clone(conn),
                self.state.filter(),
                self.realtime_tx.clone(),
            ));
        }
    }

    fn publish(&self) {
        self.publisher.publish(self.state.freeze());
    }
}

/// Caller side of a running channel list.
///
/// Dropping the handle tears the list down as well.
pub struct ChannelListHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    reader: ListReader,
    events: broadcast::Sender<ViewEvent>,
    task: Option<JoinHandle<()>>,
}

impl ChannelListHandle {
    fn send(&self, cmd: Command) -> Result<(), ViewError> {
        self.cmd_tx.send(cmd).map_err(|_| ViewError::Closed)
    }

    /// Raw keystroke text; the committed term follows after the quiet interval.
    pub fn set_search(&self, text: impl Into<String>) -> Result<(), ViewError> {
        self.send(Command::Search(text.into()))
    }

    pub fn set_type_filter(&self, filter: impl Into<TypeFilter>) -> Result<(), ViewError> {
        self.send(Command::Filter(filter.into()))
    }

    pub fn on_scroll(&self, metrics: ScrollMetrics) -> Result<(), ViewError> {
        self.send(Command::Scroll(metrics))
    }

    /// Signal from the creation dialog: reload from page 0 with a smooth scroll.
    pub fn channel_created(&self) -> Result<(), ViewError> {
        self.send(Command::ChannelCreated)
    }

    pub fn set_connection(&self, conn: Option<Arc<HubConnection>>) -> Result<(), ViewError> {
        self.send(Command::Connection(conn))
    }

    /// Ask the router to open a channel; returns the requested path.
    pub fn open(&self, id: ChannelId) -> String {
        let path = chat_path(id);
        let _ = self.events.send(ViewEvent::Navigate(path.clone()));
        path
    }

    pub fn current(&self) -> Arc<ListSnapshot> { self.reader.current() }
    pub fn reader(&self) -> ListReader { self.reader.clone() }
    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> { self.events.subscribe() }

    /// Stop the list and wait for its task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start a list instance on the current tokio runtime.
///
/// The first page is requested right away with an empty search term. The
/// list tracks its own busy flag even when `fetcher` is shared with others.
pub fn spawn_channel_list(
    config: ListConfig,
    fetcher: PageFetcher,
    connection: Option<Arc<HubConnection>>,
    filter: TypeFilter,
) -> ChannelListHandle {
    let mut state = Reconciler::new(config.page_size);
    state.set_filter(filter);
    let (publisher, reader) = publisher((*state.freeze()).clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (realtime_tx, realtime_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(64);
    let engine = Engine {
        fetcher: fetcher.detached(),
        sentinel: ScrollSentinel::new(config.scroll_threshold),
        search: SearchInput::new(config.debounce),
        state,
        publisher,
        events: events.clone(),
        cmd_rx,
        realtime_tx,
        realtime_rx,
        connection,
        subscription: None,
        in_flight: None,
    };
    let task = tokio::spawn(engine.run());
    ChannelListHandle { cmd_tx, reader, events, task: Some(task) }
}
