//! # Vector Clock
//!
//! A per-actor `{count, insert, time}` map used by [`crate::gossip::ring::GossipRing`]
//! to detect whether one membership view causally descends another, and to
//! resolve concurrent updates via last-write-wins when it doesn't.
//!
//! `insert` is set once, the first time an actor appears, and never changes
//! again — it's what last-write-wins compares. `time` moves forward on
//! every increment. `count` only ever goes up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One actor's entry in a [`VectorClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntry {
    pub count: u64,
    /// Microseconds since the Unix epoch when this actor first appeared.
    pub insert: i64,
    /// Microseconds since the Unix epoch of the most recent increment.
    pub time: i64,
}

/// Trim bounds, relative to a reference timestamp, controlling how
/// aggressively [`VectorClock::trim`] prunes old actors. Mirrors the
/// `*Options`/`*Config` convention used by every tunable in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VClockOptions {
    /// Below this many entries, never trim.
    pub lower_bound: usize,
    /// If the youngest entry is younger than this (in microseconds), never trim.
    pub young_bound_us: i64,
    /// Hard cap on entry count after trimming.
    pub upper_bound: usize,
    /// Entries older than this (in microseconds) are dropped outright.
    pub old_bound_us: i64,
}

impl Default for VClockOptions {
    fn default() -> Self {
        Self {
            lower_bound: 10,
            young_bound_us: 20_000_000,
            upper_bound: 50,
            old_bound_us: 86_400_000_000,
        }
    }
}

/// Returns the current time in microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Per-actor version vector with last-write-wins conflict metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: HashMap<String, ClockEntry>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, actor: &str) -> bool {
        self.entries.contains_key(actor)
    }

    pub fn get(&self, actor: &str) -> Option<ClockEntry> {
        self.entries.get(actor).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn actors(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Inserts a fresh actor at count 0 if it is not already present.
    /// No-op (does not reset `insert`/`time`) if the actor already exists.
    pub fn insert(&mut self, actor: &str, now_us: i64) {
        self.entries.entry(actor.to_string()).or_insert(ClockEntry {
            count: 0,
            insert: now_us,
            time: now_us,
        });
    }

    /// Increments `actor`'s count, setting `insert` on first appearance and
    /// always refreshing `time`.
    pub fn increment(&mut self, actor: &str, now_us: i64) {
        let entry = self.entries.entry(actor.to_string()).or_insert(ClockEntry {
            count: 0,
            insert: now_us,
            time: now_us,
        });
        entry.count += 1;
        entry.time = now_us;
    }

    /// Returns `true` iff every actor present in `other` is present here
    /// with a count at least as large.
    pub fn descends(&self, other: &VectorClock) -> bool {
        other.entries.iter().all(|(actor, other_entry)| {
            self.entries
                .get(actor)
                .is_some_and(|mine| mine.count >= other_entry.count)
        })
    }

    /// The largest `insert` timestamp across all actors, or `None` if empty.
    /// This is what last-write-wins conflict resolution compares.
    pub fn max_insert(&self) -> Option<i64> {
        self.entries.values().map(|e| e.insert).max()
    }

    /// The largest `time` timestamp across all actors, or `None` if empty.
    pub fn max_time(&self) -> Option<i64> {
        self.entries.values().map(|e| e.time).max()
    }

    /// Merges `other` into `self`: for each actor, keep whichever entry has
    /// the higher count (ties keep `self`'s entry, preserving its `insert`).
    pub fn merge(&mut self, other: &VectorClock) {
        for (actor, other_entry) in &other.entries {
            match self.entries.get_mut(actor) {
                Some(mine) => {
                    if other_entry.count > mine.count {
                        mine.count = other_entry.count;
                        mine.time = mine.time.max(other_entry.time);
                    }
                }
                None => {
                    self.entries.insert(actor.clone(), *other_entry);
                }
            }
        }
    }

    /// Drops actors whose entries have aged past the configured bounds,
    /// relative to `now_us`. See spec: below `lower_bound` entries, or with
    /// a youngest entry more recent than `young_bound_us`, nothing is
    /// trimmed. Otherwise entries older than `old_bound_us` are dropped,
    /// and if the clock is still above `upper_bound`, the oldest-by-`time`
    /// entries are dropped until it isn't.
    pub fn trim(&mut self, opts: &VClockOptions, now_us: i64) {
        if self.entries.len() <= opts.lower_bound {
            return;
        }
        let youngest_age = self
            .entries
            .values()
            .map(|e| now_us - e.time)
            .min()
            .unwrap_or(i64::MAX);
        if youngest_age < opts.young_bound_us {
            return;
        }

        self.entries
            .retain(|_, e| now_us - e.time <= opts.old_bound_us);

        if self.entries.len() > opts.upper_bound {
            let mut by_time: Vec<(String, i64)> = self
                .entries
                .iter()
                .map(|(actor, e)| (actor.clone(), e.time))
                .collect();
            by_time.sort_by_key(|(_, time)| *time);
            let excess = self.entries.len() - opts.upper_bound;
            for (actor, _) in by_time.into_iter().take(excess) {
                self.entries.remove(&actor);
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("VectorClock serializes infallibly")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_sets_insert_once_and_moves_time() {
        let mut c = VectorClock::new();
        c.increment("a", 100);
        let first = c.get("a").unwrap();
        assert_eq!(first.insert, 100);
        assert_eq!(first.count, 1);

        c.increment("a", 200);
        let second = c.get("a").unwrap();
        assert_eq!(second.insert, 100);
        assert_eq!(second.time, 200);
        assert_eq!(second.count, 2);
    }

    #[test]
    fn descends_requires_all_actors_with_at_least_the_count() {
        let mut a = VectorClock::new();
        a.increment("x", 1);
        a.increment("x", 2);

        let mut b = VectorClock::new();
        b.increment("x", 1);

        assert!(a.descends(&b));
        assert!(!b.descends(&a));
    }

    #[test]
    fn descends_is_reflexive_after_reducing_count() {
        let mut c = VectorClock::new();
        c.increment("a", 1);
        c.increment("a", 2);
        c.increment("b", 3);

        let mut reduced = c.clone();
        reduced.entries.get_mut("a").unwrap().count -= 1;

        assert!(c.descends(&reduced));
    }

    #[test]
    fn json_round_trip_preserves_equality() {
        let mut c = VectorClock::new();
        c.increment("a", 10);
        c.increment("b", 20);

        let round_tripped = VectorClock::from_json(&c.to_json()).unwrap();
        assert_eq!(c, round_tripped);
    }

    #[test]
    fn merge_keeps_higher_count_per_actor() {
        let mut a = VectorClock::new();
        a.increment("x", 1);

        let mut b = VectorClock::new();
        b.increment("x", 1);
        b.increment("x", 2);
        b.increment("y", 3);

        a.merge(&b);
        assert_eq!(a.get("x").unwrap().count, 2);
        assert_eq!(a.get("y").unwrap().count, 1);
    }

    #[test]
    fn trim_respects_lower_bound() {
        let opts = VClockOptions {
            lower_bound: 5,
            young_bound_us: 0,
            upper_bound: 1,
            old_bound_us: 0,
        };
        let mut c = VectorClock::new();
        for i in 0..3 {
            c.increment(&format!("actor-{i}"), 0);
        }
        c.trim(&opts, 1_000_000);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn trim_skips_when_youngest_entry_is_recent() {
        let opts = VClockOptions {
            lower_bound: 0,
            young_bound_us: 1_000,
            upper_bound: 0,
            old_bound_us: 0,
        };
        let mut c = VectorClock::new();
        c.increment("a", 999_500);
        c.trim(&opts, 1_000_000);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn trim_drops_old_then_caps_at_upper_bound() {
        let opts = VClockOptions {
            lower_bound: 0,
            young_bound_us: 0,
            upper_bound: 1,
            old_bound_us: 500,
        };
        let mut c = VectorClock::new();
        c.increment("old", 0);
        c.increment("mid", 600);
        c.increment("new", 999);
        // now=1000: "old" is 1000us old (> old_bound_us=500) -> dropped.
        // remaining: "mid" (age 400), "new" (age 1) -> still 2 > upper_bound=1
        // -> oldest by time ("mid") dropped.
        c.trim(&opts, 1_000);
        assert_eq!(c.len(), 1);
        assert!(c.has("new"));
    }
}
