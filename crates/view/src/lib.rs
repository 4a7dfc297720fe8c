//! Chanlist view engine.
//!
//! One [`spawn_channel_list`] call runs one list instance as a single tokio
//! task. Keystrokes, scroll callbacks, filter changes and push events all
//! arrive on that task and mutate the list through the reconciler in
//! `chanlist-store`. Readers watch published snapshots.

#![forbid(unsafe_code)]

pub mod config;
pub mod debounce;
pub mod sentinel;
mod engine;

pub use config::ListConfig;
pub use engine::{spawn_channel_list, ChannelListHandle, ViewError, ViewEvent};
pub use sentinel::{ScrollMetrics, ScrollSentinel};
