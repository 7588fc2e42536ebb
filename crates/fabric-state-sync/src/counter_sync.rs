//! Group-key message counter synchronization.
//!
//! A node that receives a group-keyed message from a peer whose counter it
//! has not synchronized asks the peer for its counter, piggybacking the
//! request on an outbound group-keyed message. Responses echo the counter of
//! that request. A response is only trusted if the echoed counter lies in the
//! fresh window: from the counter of the first request of the current round
//! up to (but excluding) the node's next group-key counter.
//!
//! ```text
//!            request sent
//!   Idle ────────────────────────► RequestInProgress ──┐
//!    ▲                                   │     ▲       │ timeout,
//!    │        timeout, no request        │     └───────┘ request sent
//!    └───────────────────────────────────┘              (window slides)
//! ```

use std::time::Duration;

use fabric_state_core::NodeId;
use tracing::{debug, trace};

use crate::error::Result;
use crate::peer_cache::PeerStateCache;
use crate::timer::{TimerEvent, TimerService};

/// Largest fresh window width that can be tracked.
pub const MAX_FRESH_WINDOW_WIDTH: u32 = 0x3FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    RequestInProgress,
}

/// Change in expected network activity, for sleepy nodes adjusting their
/// polling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityChange {
    Increased,
    Decreased,
}

/// Tracks the fresh window of the current synchronization round.
#[derive(Debug, Clone)]
pub struct CounterSyncCoordinator {
    phase: SyncPhase,
    sent_this_period: bool,
    window_start: u32,
    window_width: u32,
    timeout: Duration,
}

impl CounterSyncCoordinator {
    /// `timeout` is the response period after which the window slides.
    pub fn new(timeout: Duration) -> Self {
        Self { phase: SyncPhase::Idle, sent_this_period: false, window_start: 0, window_width: 0, timeout }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_request_in_progress(&self) -> bool {
        self.phase == SyncPhase::RequestInProgress
    }

    pub fn window_start(&self) -> u32 {
        self.window_start
    }

    pub fn window_width(&self) -> u32 {
        self.window_width
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record that a sync request went out with group-key counter `msg_id`.
    pub fn on_request_sent(&mut self, msg_id: u32, timer: &mut dyn TimerService) -> Result<Option<ActivityChange>> {
        self.sent_this_period = true;
        if self.phase == SyncPhase::RequestInProgress {
            return Ok(None);
        }

        timer.start_timer(self.timeout, TimerEvent::MsgCounterSyncTimeout)?;
        self.phase = SyncPhase::RequestInProgress;
        self.window_start = msg_id;
        debug!(window_start = msg_id, "Message counter sync started");
        Ok(Some(ActivityChange::Increased))
    }

    /// Handle expiry of the response period. `current` is the next
    /// group-key counter value the node would send.
    pub fn on_timeout(&mut self, current: u32, timer: &mut dyn TimerService) -> Result<Option<ActivityChange>> {
        if self.phase == SyncPhase::Idle {
            return Ok(None);
        }

        if !self.sent_this_period {
            self.clear();
            debug!("Message counter sync finished");
            return Ok(Some(ActivityChange::Decreased));
        }

        self.window_start = self.window_start.wrapping_add(self.window_width);
        let mut width = current.wrapping_sub(self.window_start);
        if width > MAX_FRESH_WINDOW_WIDTH {
            self.window_start = self.window_start.wrapping_add(width - MAX_FRESH_WINDOW_WIDTH);
            width = MAX_FRESH_WINDOW_WIDTH;
        }
        self.window_width = width;
        self.sent_this_period = false;
        trace!(window_start = self.window_start, window_width = width, "Fresh window advanced");

        timer.start_timer(self.timeout, TimerEvent::MsgCounterSyncTimeout)?;
        Ok(None)
    }

    /// Whether a response echoing `requestor` belongs to this round.
    pub fn is_fresh(&self, requestor: u32, current: u32) -> bool {
        self.phase == SyncPhase::RequestInProgress
            && requestor.wrapping_sub(self.window_start) < current.wrapping_sub(self.window_start)
    }

    /// Handle a sync response from `peer`, carried in a message with counter
    /// `peer_msg_id`. Returns true if the peer's group-key counter became
    /// synchronized.
    pub fn on_response(
        &self,
        peers: &mut PeerStateCache,
        peer: NodeId,
        peer_msg_id: u32,
        requestor: u32,
        current: u32,
    ) -> bool {
        if !self.is_fresh(requestor, current) {
            trace!(peer = %peer, requestor, "Ignoring stale message counter sync response");
            return false;
        }

        let entry = peers.find_or_alloc(peer);
        if entry.group_key.synchronized {
            return false;
        }
        entry.group_key.synchronize(peer_msg_id);
        debug!(peer = %peer, counter = peer_msg_id, "Group key message counter synchronized");
        true
    }

    /// Return to Idle, disarming the timer.
    pub fn reset(&mut self, timer: &mut dyn TimerService) {
        timer.cancel_timer(TimerEvent::MsgCounterSyncTimeout);
        self.clear();
    }

    fn clear(&mut self) {
        self.phase = SyncPhase::Idle;
        self.sent_this_period = false;
        self.window_start = 0;
        self.window_width = 0;
    }
}
