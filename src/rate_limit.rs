use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::metrics::LEDGER_SIZE;

// Source of "now" for the gate and the sweeper
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// How a tier's window is laid out.
///
/// `FixedWindow` starts a new window at the first request after the old one
/// ended. `CalendarMonth` always ends at the first instant of the next UTC
/// month, so every subscriber resets together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    FixedWindow { window: TimeDelta, limit: u32 },
    CalendarMonth { limit: u32 },
}

impl Policy {
    // Windows shorter than a second are widened to one second
    pub fn fixed_window(limit: u32, window: Duration) -> Self {
        let window = window.max(Duration::from_secs(1));
        Policy::FixedWindow {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            limit,
        }
    }

    pub fn limit(&self) -> u32 {
        match self {
            Policy::FixedWindow { limit, .. } | Policy::CalendarMonth { limit } => *limit,
        }
    }

    // End of a window opened at `now`
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Policy::FixedWindow { window, .. } => now
                .checked_add_signed(*window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Policy::CalendarMonth { .. } => next_month_start(now),
        }
    }

    // Human readable reset cadence, e.g. "per hour"
    pub fn cadence(&self) -> String {
        match self {
            Policy::CalendarMonth { .. } => "per calendar month".to_string(),
            Policy::FixedWindow { window, .. } => {
                let secs = window.num_seconds();
                let (n, unit) = if secs >= 86_400 && secs % 86_400 == 0 {
                    (secs / 86_400, "day")
                } else if secs >= 3600 && secs % 3600 == 0 {
                    (secs / 3600, "hour")
                } else if secs >= 60 && secs % 60 == 0 {
                    (secs / 60, "minute")
                } else {
                    (secs, "second")
                };
                if n == 1 {
                    format!("per {unit}")
                } else {
                    format!("per {n} {unit}s")
                }
            }
        }
    }
}

fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// Usage record - consumption of one identity in its current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
    pub count: u32,
    pub window_end: DateTime<Utc>,
}

impl UsageRecord {
    fn opened(policy: &Policy, now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_end: policy.window_end(now),
        }
    }

    // still counts at exactly window_end
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_end
    }
}

/// Outcome of a single `check_and_consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    Allowed { count: u32, resets_at: DateTime<Utc> },
    Denied { resets_at: DateTime<Utc> },
}

#[cfg(test)]
impl Consumption {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Consumption::Allowed { .. })
    }

    pub fn resets_at(&self) -> DateTime<Utc> {
        match self {
            Consumption::Allowed { resets_at, .. } | Consumption::Denied { resets_at } => {
                *resets_at
            }
        }
    }
}

/// Store of usage records keyed by identity.
///
/// `check_and_consume` must be atomic per key: two concurrent calls for the
/// same key never both observe `count < limit` for the last free slot.
/// Calls for different keys must not serialize behind one global lock.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn check_and_consume(&self, key: &str, policy: &Policy, now: DateTime<Utc>)
    -> Consumption;

    async fn usage(&self, key: &str) -> Option<UsageRecord>;

    // Drop every record whose window has ended, returns how many went
    async fn sweep(&self, now: DateTime<Utc>) -> usize;

    async fn tracked(&self) -> usize;
}

// In-process ledger. The entry guard holds the shard lock for the whole
// check-then-increment.
#[derive(Default)]
pub struct MemoryLedger {
    records: DashMap<String, UsageRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn consume(&self, key: &str, policy: &Policy, now: DateTime<Utc>) -> Consumption {
        let limit = policy.limit();
        if limit == 0 {
            return Consumption::Denied {
                resets_at: policy.window_end(now),
            };
        }

        match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                let record = UsageRecord::opened(policy, now);
                slot.insert(record);
                Consumption::Allowed {
                    count: record.count,
                    resets_at: record.window_end,
                }
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();

                // window over..? start a new one
                if record.is_expired(now) {
                    *record = UsageRecord::opened(policy, now);
                    return Consumption::Allowed {
                        count: record.count,
                        resets_at: record.window_end,
                    };
                }

                if record.count < limit {
                    record.count += 1;
                    return Consumption::Allowed {
                        count: record.count,
                        resets_at: record.window_end,
                    };
                }

                Consumption::Denied {
                    resets_at: record.window_end,
                }
            }
        }
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn check_and_consume(
        &self,
        key: &str,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Consumption {
        self.consume(key, policy, now)
    }

    async fn usage(&self, key: &str) -> Option<UsageRecord> {
        self.records.get(key).map(|record| *record)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    async fn tracked(&self) -> usize {
        self.records.len()
    }
}

// Periodically drops expired records so idle identities don't pile up
pub async fn ledger_sweeper(ledger: Arc<dyn UsageLedger>, clock: Arc<dyn Clock>, every: Duration) {
    let mut interval = interval(every);

    info!(interval = ?every, "ledger sweeper started");

    loop {
        interval.tick().await;

        let removed = ledger.sweep(clock.now()).await;
        let size = ledger.tracked().await;
        LEDGER_SIZE.set(size as f64);

        if removed > 0 {
            debug!(removed, size, "swept expired usage records");
        }
    }
}
