use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chanlist_api::{MockTransport, PageFetcher};
use chanlist_core::{Channel, ChannelId, ChannelType, ListSnapshot, TypeFilter};
use chanlist_hub::HubConnection;
use chanlist_store::ListReader;
use chanlist_view::{spawn_channel_list, ChannelListHandle, ListConfig, ScrollMetrics, ViewEvent};
use clap::{Parser, Subcommand, ValueEnum};
use metrics::counter;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chanlistctl", version, about = "Channel list engine demo")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Size of the in-memory channel catalogue
    #[arg(long = "channels", global = true, default_value_t = 45)]
    channels: usize,

    /// Page size (overrides CHANLIST_PAGE_SIZE)
    #[arg(long = "page-size", global = true)]
    page_size: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load pages the way a scrolling list would and print the result
    Browse {
        /// Search term, committed after the debounce interval
        #[arg(long = "search")]
        search: Option<String>,
        /// Only channels of this numeric type
        #[arg(long = "type")]
        kind: Option<u8>,
        /// Number of pages to load
        #[arg(long = "pages", default_value_t = 1)]
        pages: u32,
    },
    /// Push simulated realtime events into a live list and print each change
    Live {
        /// Number of events to push before exiting
        #[arg(long = "events", default_value_t = 6)]
        events: u32,
        /// Delay between events in milliseconds
        #[arg(long = "interval-ms", default_value_t = 500)]
        interval_ms: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("CHANLIST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CHANLIST_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CHANLIST_METRICS_ADDR; expected host:port");
        }
    }
}

/// Wait for a snapshot matching `pred`; returns the last one seen on timeout.
async fn settle(reader: &ListReader, limit: Duration, pred: impl Fn(&ListSnapshot) -> bool) -> (bool, Arc<ListSnapshot>) {
    let mut epochs = reader.subscribe_epoch();
    let res = tokio::time::timeout(limit, async {
        loop {
            let snap = reader.current();
            if pred(&snap) {
                return;
            }
            if epochs.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    let snap = reader.current();
    (res.is_ok() && pred(&snap), snap)
}

// Idle after at least the reset that starts every list.
fn first_load_done(s: &ListSnapshot) -> bool {
    s.loading.is_none() && s.epoch >= 2
}

fn print_snapshot(output: Output, snap: &ListSnapshot, limit: Option<usize>) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(snap)?),
        Output::Human => {
            let rows = limit.unwrap_or(snap.channels.len());
            for c in snap.channels.iter().take(rows) {
                println!("{:>5}  type={}  unread={:<3}  {}", c.id, c.kind, c.unread_messages_count, c.name());
            }
            println!(
                "-- {} channels, page {}/{}, search={:?}",
                snap.channels.len(),
                snap.cursor.page_number + 1,
                snap.cursor.total_pages.max(1),
                snap.search_committed
            );
        }
    }
    Ok(())
}

fn first_failure(events: &mut tokio::sync::broadcast::Receiver<ViewEvent>) -> Option<String> {
    while let Ok(ev) = events.try_recv() {
        if let ViewEvent::FetchFailed { mode, error } = ev {
            return Some(format!("{:?} fetch failed: {}", mode, error));
        }
    }
    None
}

async fn browse(list: &ChannelListHandle, search: Option<String>, pages: u32, output: Output) -> Result<()> {
    let reader = list.reader();
    let mut events = list.subscribe_events();
    let wait = Duration::from_secs(10);

    let (ok, _) = settle(&reader, wait, first_load_done).await;
    if !ok {
        bail!("initial page did not load");
    }
    if let Some(term) = search.filter(|t| !t.is_empty()) {
        list.set_search(term.clone())?;
        let (ok, _) = settle(&reader, wait, |s| s.search_committed == term && s.loading.is_none()).await;
        if !ok {
            bail!("search {:?} did not settle", term);
        }
    }
    if let Some(msg) = first_failure(&mut events) {
        bail!(msg);
    }

    let bottom = ScrollMetrics { scroll_height: 1.0, client_height: 1.0, scroll_top: 0.0 };
    for _ in 1..pages {
        let cursor = reader.current().cursor;
        if !cursor.has_next() {
            info!(page = cursor.page_number, "browse: no more pages");
            break;
        }
        let target = cursor.page_number + 1;
        list.on_scroll(bottom)?;
        let (ok, _) = settle(&reader, wait, |s| s.cursor.page_number == target && s.loading.is_none()).await;
        if let Some(msg) = first_failure(&mut events) {
            bail!(msg);
        }
        if !ok {
            bail!("page {} did not load", target);
        }
    }
    print_snapshot(output, &reader.current(), None)
}

async fn live(list: &ChannelListHandle, conn: &HubConnection, catalogue: usize, events: u32, interval: Duration, output: Output) -> Result<()> {
    let reader = list.reader();
    let (ok, snap) = settle(&reader, Duration::from_secs(10), first_load_done).await;
    if !ok {
        bail!("initial page did not load");
    }
    print_snapshot(output, &snap, Some(5))?;

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let span = catalogue.max(1) as i64;
    for n in 1..=events {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                info!("live: interrupted");
                break;
            }
        }
        let before = reader.current().epoch;
        let id = (n as i64 * 7) % span + 1;
        let delivered = if n % 2 == 1 {
            let channel = Channel::new(id, (id % 3) as u8).with_field("name", format!("channel-{:03} (active {})", id, n));
            conn.push_channel(&channel)
        } else {
            conn.push_read_count(ChannelId(id), n)
        };
        counter!("chanlistctl_live_pushes_total", 1);
        info!(n, id, delivered, "live: pushed event");
        let (changed, snap) = settle(&reader, Duration::from_millis(200), |s| s.epoch > before).await;
        if !changed {
            warn!(id, "live: event did not change the list");
            continue;
        }
        print_snapshot(output, &snap, Some(5))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = ListConfig::from_env();
    if let Some(size) = cli.page_size.filter(|s| *s > 0) {
        config.page_size = size;
    }
    let mock = Arc::new(MockTransport::seeded(cli.channels));
    let fetcher = PageFetcher::new(mock);
    let conn = Arc::new(HubConnection::new());

    match cli.command {
        Commands::Browse { search, kind, pages } => {
            let filter = TypeFilter(kind.map(ChannelType));
            info!(?search, ?kind, pages, page_size = config.page_size, "browse invoked");
            let list = spawn_channel_list(config, fetcher, None, filter);
            let res = browse(&list, search, pages.max(1), cli.output).await;
            list.shutdown().await;
            res?;
        }
        Commands::Live { events, interval_ms } => {
            info!(events, interval_ms, "live invoked");
            let list = spawn_channel_list(config, fetcher, Some(Arc::clone(&conn)), TypeFilter::ALL);
            let res = live(&list, &conn, cli.channels, events, Duration::from_millis(interval_ms.max(1)), cli.output).await;
            list.shutdown().await;
            res?;
        }
    }
    Ok(())
}
