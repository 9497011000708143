//! Debounced persistence: one pending payload, one cancellable timer.
//!
//! The queue never talks to the network itself. The session enqueues the
//! applied subset of every local change, arms the timer, and when the
//! scheduler reports the ticket back it takes the payload and flushes it.

use std::collections::BTreeMap;

use crate::sync::document::StatePatch;
use crate::sync::ports::Scheduler;
use crate::sync::sanitize::MAX_BADGES;

impl StatePatch {
    /// Fold a later applied patch into this accumulator. Later values win
    /// per sub-key; badge lists are unioned up to [`MAX_BADGES`].
    pub fn absorb(&mut self, later: StatePatch) {
        extend_section(&mut self.unlocks, later.unlocks);
        if later.selected_unlock.is_some() {
            self.selected_unlock = later.selected_unlock;
        }
        extend_section(&mut self.purchases, later.purchases);
        extend_section(&mut self.inventory, later.inventory);

        if let Some(progress) = later.progress {
            let acc = self.progress.get_or_insert_with(Default::default);
            if progress.last_level.is_some() {
                acc.last_level = progress.last_level;
            }
        }

        if let Some(stats) = later.stats {
            let acc = self.stats.get_or_insert_with(Default::default);
            if stats.last_score.is_some() {
                acc.last_score = stats.last_score;
            }
            if stats.best_score.is_some() {
                acc.best_score = stats.best_score;
            }
            acc.counters.extend(stats.counters);
            for (key, members) in stats.groups {
                acc.groups.entry(key).or_default().extend(members);
            }
        }

        if let Some(achievements) = later.achievements {
            let acc = self.achievements.get_or_insert_with(Default::default);
            for badge in achievements.unlocked {
                if acc.unlocked.len() >= MAX_BADGES {
                    break;
                }
                if !acc.unlocked.contains(&badge) {
                    acc.unlocked.push(badge);
                }
            }
            acc.milestones.extend(achievements.milestones);
        }

        if later.version.is_some() {
            self.version = later.version;
        }
    }
}

fn extend_section<V>(acc: &mut Option<BTreeMap<String, V>>, later: Option<BTreeMap<String, V>>) {
    if let Some(later) = later {
        acc.get_or_insert_with(BTreeMap::new).extend(later);
    }
}

pub struct PersistenceQueue {
    pending: Option<StatePatch>,
    ticket: u64,
    armed: bool,
    scheduler: Box<dyn Scheduler>,
}

impl PersistenceQueue {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            pending: None,
            ticket: 0,
            armed: false,
            scheduler,
        }
    }

    pub fn enqueue(&mut self, patch: StatePatch) {
        if patch.is_empty() {
            return;
        }
        match &mut self.pending {
            Some(acc) => acc.absorb(patch),
            None => self.pending = Some(patch),
        }
    }

    /// Restart the debounce timer. Returns the ticket the scheduler will
    /// hand back when it fires.
    pub fn arm(&mut self, delay_ms: u32) -> u64 {
        if self.armed {
            self.scheduler.cancel();
        }
        self.ticket += 1;
        self.armed = true;
        self.scheduler.arm(delay_ms, self.ticket);
        self.ticket
    }

    /// Cancel the timer and take whatever is pending.
    pub fn take_now(&mut self) -> Option<StatePatch> {
        self.disarm();
        self.pending.take()
    }

    /// Timer callback. A ticket from a superseded or cancelled timer yields
    /// nothing.
    pub fn fire(&mut self, ticket: u64) -> Option<StatePatch> {
        if !self.armed || ticket != self.ticket {
            return None;
        }
        self.armed = false;
        self.pending.take()
    }

    /// Drop the pending payload without sending it.
    pub fn discard(&mut self) {
        self.disarm();
        self.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn pending(&self) -> Option<&StatePatch> {
        self.pending.as_ref()
    }

    fn disarm(&mut self) {
        if self.armed {
            self.scheduler.cancel();
            self.armed = false;
        }
    }
}
