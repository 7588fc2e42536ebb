//! Sliding-window duplicate message detection.
//!
//! Each receive context keeps the highest counter accepted so far and a
//! 32-bit window where bit `k` records that `max_received - (k + 1)` was
//! seen. Counters up to `2^31 - 1` ahead of `max_received` count as newer.

use crate::counter::counter_delta;

/// Number of counters tracked behind `max_received`.
pub const WINDOW_SIZE: u32 = 32;

/// Replay state for one peer or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveState {
    pub max_received: u32,
    pub window: u32,
    pub synchronized: bool,
}

/// Outcome of checking a counter against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    Accept,
    Duplicate,
}

impl ReceiveState {
    /// A state that has not seen any message yet.
    pub const fn new() -> Self {
        Self { max_received: 0, window: 0, synchronized: false }
    }

    /// Synchronize on `counter` as the highest received value.
    pub fn synchronize(&mut self, counter: u32) {
        self.max_received = counter;
        self.window = 0;
        self.synchronized = true;
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Check `counter` against a synchronized window and record it if accepted.
    ///
    /// `encrypted` selects the policy for counters further back than the
    /// window: encrypted senders never regress that far, so such counters are
    /// duplicates; unencrypted senders may restart, so the window resets.
    pub fn check_and_record(&mut self, counter: u32, encrypted: bool) -> ReplayVerdict {
        let delta = counter_delta(counter, self.max_received);

        if delta > 0 {
            let delta = delta as u32;
            self.window = if delta < WINDOW_SIZE {
                // The previous maximum lands at bit delta-1.
                (((self.window as u64) << 1 | 1) << (delta - 1)) as u32
            } else {
                0
            };
            self.max_received = counter;
        } else if delta == 0 {
            return ReplayVerdict::Duplicate;
        } else {
            let behind = delta.unsigned_abs();
            if behind <= WINDOW_SIZE {
                let mask = 1u32 << (behind - 1);
                if self.window & mask != 0 {
                    return ReplayVerdict::Duplicate;
                }
                self.window |= mask;
            } else if encrypted {
                return ReplayVerdict::Duplicate;
            } else {
                self.window = 0;
                self.max_received = counter;
            }
        }

        self.synchronized = true;
        ReplayVerdict::Accept
    }

    /// Pack window and synchronization flag into the serialized receive flags.
    ///
    /// Bits 0-31 carry the window, bit 32 the synchronized flag.
    pub fn flags(&self) -> u64 {
        (self.window as u64) | ((self.synchronized as u64) << WINDOW_SIZE)
    }

    /// Inverse of [`flags`](Self::flags); `None` if undefined bits are set.
    pub fn from_flags(max_received: u32, flags: u64) -> Option<Self> {
        if flags >> (WINDOW_SIZE + 1) != 0 {
            return None;
        }
        Some(Self {
            max_received,
            window: flags as u32,
            synchronized: flags >> WINDOW_SIZE & 1 == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(max: u32) -> ReceiveState {
        let mut state = ReceiveState::new();
        state.synchronize(max);
        state
    }

    #[test]
    fn test_same_counter_is_duplicate() {
        let mut state = synced(100);
        assert_eq!(state.check_and_record(100, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_newer_counter_then_repeat() {
        let mut state = synced(100);
        assert_eq!(state.check_and_record(101, true), ReplayVerdict::Accept);
        assert_eq!(state.max_received, 101);
        assert_eq!(state.window, 0b1);
        assert_eq!(state.check_and_record(101, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_within_window_accepted_once() {
        let mut state = synced(100);
        assert_eq!(state.check_and_record(69, true), ReplayVerdict::Accept);
        assert_eq!(state.window, 1 << 30);
        assert_eq!(state.check_and_record(69, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_window_edge() {
        let mut state = synced(100);
        assert_eq!(state.check_and_record(68, true), ReplayVerdict::Accept);
        assert_eq!(state.window, 1 << 31);
        assert_eq!(state.check_and_record(67, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_beyond_window_encrypted_is_duplicate() {
        let mut state = synced(100);
        assert_eq!(state.check_and_record(50, true), ReplayVerdict::Duplicate);
        assert_eq!(state.max_received, 100);
    }

    #[test]
    fn test_beyond_window_unencrypted_resets() {
        let mut state = synced(100);
        state.check_and_record(99, false);
        assert_eq!(state.check_and_record(50, false), ReplayVerdict::Accept);
        assert_eq!(state.max_received, 50);
        assert_eq!(state.window, 0);
    }

    #[test]
    fn test_large_jump_clears_window() {
        let mut state = synced(100);
        state.check_and_record(99, true);
        assert_eq!(state.check_and_record(100 + WINDOW_SIZE, true), ReplayVerdict::Accept);
        assert_eq!(state.window, 0);
        assert_eq!(state.check_and_record(99, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_shift_keeps_history() {
        let mut state = synced(10);
        state.check_and_record(8, true);
        state.check_and_record(13, true);
        // 12, 11 unseen; 10 seen; 9 unseen; 8 seen
        assert_eq!(state.window, 0b10100);
        assert_eq!(state.check_and_record(10, true), ReplayVerdict::Duplicate);
        assert_eq!(state.check_and_record(8, true), ReplayVerdict::Duplicate);
        assert_eq!(state.check_and_record(9, true), ReplayVerdict::Accept);
    }

    #[test]
    fn test_wraparound() {
        let mut state = synced(u32::MAX - 1);
        assert_eq!(state.check_and_record(2, true), ReplayVerdict::Accept);
        assert_eq!(state.max_received, 2);
        assert_eq!(state.check_and_record(u32::MAX, true), ReplayVerdict::Accept);
        assert_eq!(state.check_and_record(u32::MAX - 1, true), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_flags_packing() {
        let state = ReceiveState { max_received: 7, window: 0x8000_0003, synchronized: true };
        assert_eq!(state.flags(), 0x1_8000_0003);
        assert_eq!(ReceiveState::from_flags(7, state.flags()), Some(state));
        assert_eq!(ReceiveState::from_flags(7, 0x2_0000_0000), None);
    }
}
