//! Per-conversation countdown that decides when to re-judge favor.
//!
//! Each key holds a counter drawn from `[min_turns, max_turns]`. Every inbound
//! user turn decrements it; reaching zero with a transcript available fires a
//! reassessment and draws a fresh counter. Entries are process-local, expire
//! after an idle TTL, and are bounded in number.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use affinity_types::models::ConversationKey;

/// Source of the random counter draws.
pub trait Draw: Send + Sync {
    /// Uniform integer in `[low, high]`.
    fn draw(&self, low: u32, high: u32) -> u32;
}

/// Thread-local RNG.
pub struct ThreadRngDraw;

impl Draw for ThreadRngDraw {
    fn draw(&self, low: u32, high: u32) -> u32 {
        rand::rng().random_range(low..=high)
    }
}

/// Always draws the same value (clamped into range). Gives a fixed cadence.
pub struct FixedDraw(pub u32);

impl Draw for FixedDraw {
    fn draw(&self, low: u32, high: u32) -> u32 {
        self.0.clamp(low, high)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub min_turns: u32,
    pub max_turns: u32,
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_turns: 1,
            max_turns: 5,
            ttl: Duration::from_secs(24 * 60 * 60),
            capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not yet; `remaining` user turns until the next reassessment is due.
    Wait { remaining: u32 },
    /// Run a reassessment now. The counter has already been redrawn.
    Reassess { next_in: u32 },
}

impl Decision {
    pub fn should_reassess(&self) -> bool {
        matches!(self, Self::Reassess { .. })
    }
}

struct Entry {
    remaining: u32,
    touched: Instant,
}

pub struct FavorScheduler {
    entries: Mutex<HashMap<ConversationKey, Entry>>,
    draw: Box<dyn Draw>,
    clock: Box<dyn Clock>,
    config: ScheduleConfig,
}

impl FavorScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self::with_parts(config, Box::new(ThreadRngDraw), Box::new(SystemClock))
    }

    pub fn with_parts(config: ScheduleConfig, draw: Box<dyn Draw>, clock: Box<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            draw,
            clock,
            config,
        }
    }

    /// Records one inbound user turn for `key` and decides whether to reassess.
    ///
    /// The lookup, decrement and redraw happen under one lock, so concurrent
    /// turns on the same key can neither both fire nor both miss.
    pub fn tick(&self, key: &ConversationKey, transcript_available: bool) -> Decision {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = entries
            .get(key)
            .is_some_and(|e| now.saturating_duration_since(e.touched) > self.config.ttl);
        if expired {
            entries.remove(key);
        }

        if !entries.contains_key(key) && entries.len() >= self.config.capacity {
            self.make_room(&mut entries, now);
        }

        let initial = if entries.contains_key(key) { 0 } else { self.draw_count() };
        let entry = entries.entry(key.clone()).or_insert(Entry {
            remaining: initial,
            touched: now,
        });
        entry.touched = now;
        entry.remaining = entry.remaining.saturating_sub(1);

        if entry.remaining == 0 && transcript_available {
            entry.remaining = self.draw_count();
            debug!("Favor reassessment due for {}, next in {}", key, entry.remaining);
            Decision::Reassess { next_in: entry.remaining }
        } else {
            Decision::Wait { remaining: entry.remaining }
        }
    }

    /// Current counter for `key`, if it is tracked.
    pub fn remaining(&self, key: &ConversationKey) -> Option<u32> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.remaining)
    }

    /// Drops the schedule for an abandoned conversation.
    pub fn forget(&self, key: &ConversationKey) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    /// Removes entries idle for longer than the TTL. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let ttl = self.config.ttl;
        entries.retain(|_, e| now.saturating_duration_since(e.touched) <= ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn draw_count(&self) -> u32 {
        let low = self.config.min_turns.max(1);
        let high = self.config.max_turns.max(low);
        self.draw.draw(low, high)
    }

    /// Frees one slot: expired entries first, otherwise the least recently touched.
    fn make_room(&self, entries: &mut HashMap<ConversationKey, Entry>, now: Instant) {
        let ttl = self.config.ttl;
        entries.retain(|_, e| now.saturating_duration_since(e.touched) <= ttl);
        if entries.len() < self.config.capacity {
            return;
        }
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.touched)
            .map(|(k, _)| k.clone());
        if let Some(k) = oldest {
            entries.remove(&k);
        }
    }
}

/// Background task that periodically evicts idle schedule entries.
pub async fn run_sweep_loop(scheduler: std::sync::Arc<FavorScheduler>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let evicted = scheduler.evict_expired();
        if evicted > 0 {
            info!("Schedule sweep: evicted {} idle conversations", evicted);
        }
    }
}
