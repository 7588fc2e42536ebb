//! # Fabric State Sync
//!
//! Receive state kept outside sessions, and the synchronization of
//! group-key message counters.
//!
//! ## Overview
//!
//! - [`PeerStateCache`] holds replay windows for unencrypted and group-keyed
//!   traffic, one entry per recently seen peer.
//! - [`CounterSyncCoordinator`] decides which counter sync responses are
//!   fresh and marks the responding peer synchronized.
//! - [`TimerService`] arms the response timeout. [`TokioTimer`] delivers
//!   expired timers as [`TimerEvent`]s on a channel read by the owning event
//!   loop; [`ManualTimer`] is fired by hand.
//!
//! Nothing here locks. All state is owned by one event loop.

pub mod counter_sync;
pub mod error;
pub mod peer_cache;
pub mod timer;

pub use counter_sync::{ActivityChange, CounterSyncCoordinator, SyncPhase, MAX_FRESH_WINDOW_WIDTH};
pub use error::{Result, TimerError};
pub use peer_cache::{PeerStateCache, PeerStateEntry};
pub use timer::{ManualTimer, TimerEvent, TimerService, TokioTimer};
