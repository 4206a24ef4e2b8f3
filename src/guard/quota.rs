//! # Quota Tracker
//! Per-upstream call budget over a tumbling time window.
//!
//! `try_acquire` checks the remaining budget and reserves a slot under one lock
//! acquisition, so concurrent fetch tasks can never overshoot the budget.
//! `record_call` counts upstream calls that actually completed.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// How the budget window is laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    /// Aligned to the start of the current UTC minute.
    PerMinute,
    /// Aligned to the first instant of the current UTC calendar month.
    Monthly,
    /// Starts at the first call after the previous window expired.
    #[serde(with = "secs")]
    Fixed(Duration),
}

impl QuotaWindow {
    /// Start of the window containing `now`, given the current window start.
    fn window_start(&self, current_start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            QuotaWindow::PerMinute => now
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now),
            QuotaWindow::Monthly => Utc
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(now),
            QuotaWindow::Fixed(len) => {
                let len = chrono::Duration::from_std(*len).unwrap_or(chrono::Duration::MAX);
                if now < current_start || now - current_start >= len {
                    now
                } else {
                    current_start
                }
            }
        }
    }
}

/// Snapshot of a tracker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    /// Slots reserved in the current window.
    pub call_count: u32,
    /// Upstream calls that completed in the current window.
    pub completed: u32,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug)]
pub struct QuotaTracker {
    name: String,
    budget: u32,
    window: QuotaWindow,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    pub fn new(name: impl Into<String>, budget: u32, window: QuotaWindow) -> Self {
        Self::starting_at(name, budget, window, Utc::now())
    }

    /// Tracker whose first window contains `now` (useful for tests).
    pub fn starting_at(
        name: impl Into<String>,
        budget: u32,
        window: QuotaWindow,
        now: DateTime<Utc>,
    ) -> Self {
        let window_start = window.window_start(now, now);
        Self {
            name: name.into(),
            budget,
            window,
            state: Mutex::new(QuotaState {
                call_count: 0,
                completed: 0,
                window_start,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    /// Reserve one call slot if budget remains in the window containing `now`.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut st = self.state.lock().expect("quota mutex poisoned");
        Self::roll(&self.window, &mut st, now);
        if st.call_count >= self.budget {
            tracing::debug!(
                upstream = %self.name,
                call_count = st.call_count,
                budget = self.budget,
                "quota exhausted"
            );
            return false;
        }
        st.call_count += 1;
        true
    }

    pub fn record_call(&self) {
        self.record_call_at(Utc::now())
    }

    pub fn record_call_at(&self, now: DateTime<Utc>) {
        let mut st = self.state.lock().expect("quota mutex poisoned");
        Self::roll(&self.window, &mut st, now);
        st.completed = st.completed.saturating_add(1);
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        let mut st = self.state.lock().expect("quota mutex poisoned");
        Self::roll(&self.window, &mut st, now);
        self.budget.saturating_sub(st.call_count)
    }

    pub fn snapshot(&self) -> QuotaState {
        self.state.lock().expect("quota mutex poisoned").clone()
    }

    /// Reset counters when `now` falls in a later window. Caller holds the lock.
    /// Windows only move forward; a clock stepping back keeps the current one.
    fn roll(window: &QuotaWindow, st: &mut QuotaState, now: DateTime<Utc>) {
        let start = window.window_start(st.window_start, now);
        if start > st.window_start {
            st.window_start = start;
            st.call_count = 0;
            st.completed = 0;
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn budget_is_enforced_within_window() {
        let t0 = at(2025, 12, 21, 10, 0, 5);
        let q = QuotaTracker::starting_at("finnhub", 3, QuotaWindow::PerMinute, t0);
        assert!(q.try_acquire_at(t0));
        assert!(q.try_acquire_at(t0));
        assert!(q.try_acquire_at(t0));
        assert!(!q.try_acquire_at(t0 + chrono::Duration::seconds(30)));
        assert_eq!(q.remaining_at(t0), 0);
    }

    #[test]
    fn per_minute_window_resets_on_boundary() {
        let t0 = at(2025, 12, 21, 10, 0, 59);
        let q = QuotaTracker::starting_at("finnhub", 1, QuotaWindow::PerMinute, t0);
        assert!(q.try_acquire_at(t0));
        assert!(!q.try_acquire_at(t0));
        let next = at(2025, 12, 21, 10, 1, 0);
        assert!(q.try_acquire_at(next));
        assert_eq!(q.snapshot().window_start, next);
    }

    #[test]
    fn monthly_window_aligns_to_calendar_month() {
        let t0 = at(2025, 12, 31, 23, 59, 0);
        let q = QuotaTracker::starting_at("tiingo", 2, QuotaWindow::Monthly, t0);
        assert_eq!(q.snapshot().window_start, at(2025, 12, 1, 0, 0, 0));
        assert!(q.try_acquire_at(t0));
        assert!(q.try_acquire_at(t0));
        assert!(!q.try_acquire_at(t0));
        let jan = at(2026, 1, 1, 0, 0, 0);
        assert_eq!(q.remaining_at(jan), 2);
        assert_eq!(q.snapshot().window_start, jan);
    }

    #[test]
    fn fixed_window_restarts_at_first_call_after_expiry() {
        let t0 = at(2025, 12, 21, 10, 0, 0);
        let q = QuotaTracker::starting_at("x", 1, QuotaWindow::Fixed(Duration::from_secs(10)), t0);
        assert!(q.try_acquire_at(t0));
        assert!(!q.try_acquire_at(t0 + chrono::Duration::seconds(9)));
        let t1 = t0 + chrono::Duration::seconds(12);
        assert!(q.try_acquire_at(t1));
        assert_eq!(q.snapshot().window_start, t1);
    }

    #[test]
    fn zero_budget_never_grants() {
        let q = QuotaTracker::new("tiingo", 0, QuotaWindow::Monthly);
        assert!(!q.try_acquire());
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn record_call_counts_completed_calls_only() {
        let t0 = at(2025, 12, 21, 10, 0, 0);
        let q = QuotaTracker::starting_at("finnhub", 5, QuotaWindow::PerMinute, t0);
        assert!(q.try_acquire_at(t0));
        assert!(q.try_acquire_at(t0));
        q.record_call_at(t0);
        let s = q.snapshot();
        assert_eq!(s.call_count, 2);
        assert_eq!(s.completed, 1);
    }

    #[test]
    fn concurrent_acquire_never_exceeds_budget() {
        let q = Arc::new(QuotaTracker::new("finnhub", 60, QuotaWindow::Fixed(Duration::from_secs(3600))));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || (0..50).filter(|_| q.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 60);
        assert_eq!(q.snapshot().call_count, 60);
    }

    #[test]
    fn window_deserializes_from_config_shape() {
        #[derive(Deserialize)]
        struct W {
            window: QuotaWindow,
        }
        let w: W = toml::from_str(r#"window = "monthly""#).unwrap();
        assert_eq!(w.window, QuotaWindow::Monthly);
        let w: W = toml::from_str(r#"window = { fixed = 90 }"#).unwrap();
        assert_eq!(w.window, QuotaWindow::Fixed(Duration::from_secs(90)));
    }
}
