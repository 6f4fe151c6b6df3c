//! Node state retained across suspension.
//!
//! Lifecycle: survives every sleep, resets only on a cold power-on. Before
//! suspending, the scheduler serialises it into a fixed block kept in
//! retention memory; on resume the block is restored, and a block without the
//! magic word means the retention memory was lost.

use super::Tick;

pub const RETAINED_LEN: usize = 21;

const MAGIC: u32 = 0x5452_4150;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetainedState {
    /// Triggers accepted since cold boot. Never decreases.
    pub trap_count: u32,
    /// Wake cycles since cold boot.
    pub wake_count: u32,
    pub last_trigger_tick: Tick,
    /// Timer wakes since cold boot, drives the every-Nth status report.
    pub timer_wakes: u32,
    /// Confirmed sensor line state at suspension.
    pub line_closed: bool,
}

impl RetainedState {
    /// Fresh state after a cold power-on.
    pub fn cold() -> Self {
        RetainedState::default()
    }

    pub(crate) fn record_wake(&mut self) {
        self.wake_count = self.wake_count.wrapping_add(1);
    }

    /// Count an accepted trigger. Returns the new trap count.
    pub(crate) fn record_trigger(&mut self, now: Tick) -> u32 {
        self.trap_count = self.trap_count.saturating_add(1);
        self.last_trigger_tick = now;
        self.trap_count
    }

    /// Count a timer wake. Returns the number of timer wakes so far.
    pub(crate) fn record_timer_wake(&mut self) -> u32 {
        self.timer_wakes = self.timer_wakes.wrapping_add(1);
        self.timer_wakes
    }

    pub fn to_block(&self) -> [u8; RETAINED_LEN] {
        let mut block = [0u8; RETAINED_LEN];
        block[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        block[4..8].copy_from_slice(&self.trap_count.to_le_bytes());
        block[8..12].copy_from_slice(&self.wake_count.to_le_bytes());
        block[12..16].copy_from_slice(&self.last_trigger_tick.to_le_bytes());
        block[16..20].copy_from_slice(&self.timer_wakes.to_le_bytes());
        block[20] = u8::from(self.line_closed);
        block
    }

    /// Restore from a retention block, `None` if the block is not ours.
    pub fn from_block(block: &[u8; RETAINED_LEN]) -> Option<Self> {
        let word = |at: usize| u32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]]);

        if word(0) != MAGIC || block[20] > 1 {
            return None;
        }

        Some(RetainedState {
            trap_count: word(4),
            wake_count: word(8),
            last_trigger_tick: word(12),
            timer_wakes: word(16),
            line_closed: block[20] == 1,
        })
    }
}
