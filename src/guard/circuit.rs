//! # Circuit Breaker
//! Failure-rate gate in front of one upstream.
//!
//! CLOSED: calls pass, failures collect in a rolling window.
//! OPEN: nobody calls until `cooldown` has elapsed since the trip.
//! HALF_OPEN: exactly one probe call is let through; its success closes the
//! breaker, its failure re-opens it and restarts the cooldown.
//!
//! Every transition happens under a single lock, so two concurrent callers can
//! never both become the probe.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// How bad a failure is. Auth/config failures trip the breaker sooner because
/// retrying is pointless until someone fixes the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Auth,
}

/// Permission handed out by [`CircuitBreaker::admit_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Regular call while CLOSED.
    Normal,
    /// The single probe call while HALF_OPEN.
    Probe,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_auth_failure_threshold() -> u32 {
    1
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_cooldown_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: u32,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            auth_failure_threshold: default_auth_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitConfig {
    fn failure_window(&self) -> chrono::Duration {
        to_chrono(Duration::from_secs(self.failure_window_secs))
    }

    fn cooldown(&self) -> chrono::Duration {
        to_chrono(Duration::from_secs(self.cooldown_secs))
    }

    fn threshold_for(&self, kind: FailureKind) -> usize {
        let t = match kind {
            FailureKind::Transient => self.failure_threshold,
            FailureKind::Auth => self.auth_failure_threshold,
        };
        t.max(1) as usize
    }
}

/// Snapshot of a breaker, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    /// Failures inside the rolling window (CLOSED) or since the trip.
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct Inner {
    status: CircuitStatus,
    failures: VecDeque<DateTime<Utc>>,
    last_failure_time: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    probe_started: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                status: CircuitStatus::Closed,
                failures: VecDeque::new(),
                last_failure_time: None,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allow_call(&self) -> bool {
        self.admit_at(Utc::now()).is_some()
    }

    pub fn allow_call_at(&self, now: DateTime<Utc>) -> bool {
        self.admit_at(now).is_some()
    }

    /// Ask for permission to call the upstream at `now`.
    pub fn admit_at(&self, now: DateTime<Utc>) -> Option<Admission> {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        match g.status {
            CircuitStatus::Closed => Some(Admission::Normal),
            CircuitStatus::Open => {
                let opened_at = g.opened_at.unwrap_or(now);
                if now - opened_at >= self.cfg.cooldown() {
                    g.status = CircuitStatus::HalfOpen;
                    g.probe_started = Some(now);
                    tracing::info!(upstream = %self.name, "circuit half-open, admitting probe");
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
            CircuitStatus::HalfOpen => match g.probe_started {
                // A probe that never reported back within one cooldown is lost.
                Some(started) if now - started < self.cfg.cooldown() => None,
                _ => {
                    g.probe_started = Some(now);
                    Some(Admission::Probe)
                }
            },
        }
    }

    /// Give back a permission that was not used for an upstream call.
    pub fn cancel(&self, admission: Admission) {
        if admission != Admission::Probe {
            return;
        }
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        if g.status == CircuitStatus::HalfOpen {
            g.probe_started = None;
        }
    }

    /// Report a successful call made under `admission`.
    pub fn record_success(&self, admission: Admission) {
        self.record_success_at(admission, Utc::now())
    }

    /// Only the probe's own result can move the breaker out of HALF_OPEN; a
    /// late result from a call admitted before the trip is just recorded.
    pub fn record_success_at(&self, admission: Admission, now: DateTime<Utc>) {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        match (g.status, admission) {
            (CircuitStatus::HalfOpen, Admission::Probe) => {
                g.status = CircuitStatus::Closed;
                g.failures.clear();
                g.opened_at = None;
                g.probe_started = None;
                tracing::info!(upstream = %self.name, "circuit closed after successful probe");
            }
            (CircuitStatus::Closed, _) => {
                let cutoff = now - self.cfg.failure_window();
                evict_before(&mut g.failures, cutoff);
            }
            (CircuitStatus::HalfOpen, Admission::Normal) | (CircuitStatus::Open, _) => {
                tracing::debug!(upstream = %self.name, ?admission, "stale success ignored");
            }
        }
    }

    pub fn record_failure(&self, admission: Admission) {
        self.record_failure_at(admission, FailureKind::Transient, Utc::now())
    }

    pub fn record_failure_kind(&self, admission: Admission, kind: FailureKind) {
        self.record_failure_at(admission, kind, Utc::now())
    }

    pub fn record_failure_at(&self, admission: Admission, kind: FailureKind, now: DateTime<Utc>) {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        g.last_failure_time = Some(now);
        match (g.status, admission) {
            (CircuitStatus::HalfOpen, Admission::Probe) => {
                g.failures.push_back(now);
                g.status = CircuitStatus::Open;
                g.opened_at = Some(now);
                g.probe_started = None;
                tracing::warn!(upstream = %self.name, "probe failed, circuit re-opened");
            }
            (CircuitStatus::Closed, _) => {
                g.failures.push_back(now);
                let cutoff = now - self.cfg.failure_window();
                evict_before(&mut g.failures, cutoff);
                let threshold = self.cfg.threshold_for(kind);
                if g.failures.len() >= threshold {
                    g.status = CircuitStatus::Open;
                    g.opened_at = Some(now);
                    tracing::warn!(
                        upstream = %self.name,
                        failures = g.failures.len(),
                        threshold,
                        ?kind,
                        "circuit opened"
                    );
                }
            }
            // Late failure from a call admitted before the trip: counted, but
            // neither the cooldown nor the probe in flight is touched.
            (CircuitStatus::HalfOpen, Admission::Normal) | (CircuitStatus::Open, _) => {
                g.failures.push_back(now)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        let g = self.inner.lock().expect("circuit mutex poisoned");
        CircuitState {
            status: g.status,
            failure_count: u32::try_from(g.failures.len()).unwrap_or(u32::MAX),
            last_failure_time: g.last_failure_time,
            probe_in_flight: g.status == CircuitStatus::HalfOpen && g.probe_started.is_some(),
        }
    }
}

fn evict_before(buf: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while let Some(&t) = buf.front() {
        if t < cutoff {
            buf.pop_front();
        } else {
            break;
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
