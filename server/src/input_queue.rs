//! Per-session input mailbox shared between connection tasks and the tick
//!
//! Connection tasks call [`InputQueue::submit`] at any time; the owning
//! session calls [`InputQueue::drain_all`] once per tick. Both run under the
//! same short lock, and a drain swaps out every pending slot at once, so a
//! submission is either fully visible to a drain or deferred to the next one.
//!
//! Selection rules per player:
//! - input stamped with a tick that was already drained is stale and dropped
//! - a pending record with a higher receipt tick is never replaced by an
//!   older one; equal ticks are last-writer-wins
//! - a heading opposite to the last applied heading is dropped

use parking_lot::Mutex;
use shared::{Direction, PlayerId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub player: PlayerId,
    pub heading: Direction,
    pub receipt_tick: u64,
}

/// What `submit` did with an input. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Replaced,
    Stale,
    Superseded,
    Reversal,
    UnknownPlayer,
}

#[derive(Debug)]
struct Slot {
    applied: Direction,
    pending: Option<InputRecord>,
}

#[derive(Debug)]
struct Inner {
    next_tick: u64,
    slots: BTreeMap<PlayerId, Slot>,
}

#[derive(Debug)]
pub struct InputQueue {
    inner: Mutex<Inner>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_tick: 0,
                slots: BTreeMap::new(),
            }),
        }
    }

    /// Opens a mailbox for `player` whose snake currently faces `heading`.
    pub fn register(&self, player: PlayerId, heading: Direction) {
        self.inner.lock().slots.insert(
            player,
            Slot {
                applied: heading,
                pending: None,
            },
        );
    }

    pub fn remove(&self, player: PlayerId) {
        self.inner.lock().slots.remove(&player);
    }

    /// Tick the next drain will consume. Used to stamp incoming input.
    pub fn next_tick(&self) -> u64 {
        self.inner.lock().next_tick
    }

    pub fn submit(&self, player: PlayerId, heading: Direction, tick: u64) -> SubmitOutcome {
        let mut inner = self.inner.lock();
        inner.store(player, heading, tick)
    }

    /// Stamps with the next unconsumed tick and submits under one lock, so a
    /// drain can never slip in between and make the input stale.
    pub fn submit_current(&self, player: PlayerId, heading: Direction) -> SubmitOutcome {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick;
        inner.store(player, heading, tick)
    }

    /// Takes every pending input in player order and advances the tick.
    ///
    /// Drained headings become the players' applied headings for later
    /// reversal checks.
    pub fn drain_all(&self) -> Vec<InputRecord> {
        let mut inner = self.inner.lock();
        inner.next_tick += 1;
        let mut drained = Vec::new();
        for slot in inner.slots.values_mut() {
            if let Some(record) = slot.pending.take() {
                slot.applied = record.heading;
                drained.push(record);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }
}

impl Inner {
    fn store(&mut self, player: PlayerId, heading: Direction, tick: u64) -> SubmitOutcome {
        if tick < self.next_tick {
            return SubmitOutcome::Stale;
        }
        let Some(slot) = self.slots.get_mut(&player) else {
            return SubmitOutcome::UnknownPlayer;
        };
        if heading == slot.applied.opposite() {
            return SubmitOutcome::Reversal;
        }

        let record = InputRecord {
            player,
            heading,
            receipt_tick: tick,
        };
        match slot.pending {
            Some(existing) if existing.receipt_tick > tick => SubmitOutcome::Superseded,
            Some(_) => {
                slot.pending = Some(record);
                SubmitOutcome::Replaced
            }
            None => {
                slot.pending = Some(record);
                SubmitOutcome::Accepted
            }
        }
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}
