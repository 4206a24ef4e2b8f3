//! Per-upstream call gates shared by all fetch tasks: a call budget
//! ([`QuotaTracker`]) and a failure gate ([`CircuitBreaker`]).
//! One instance of each per upstream, passed around by `Arc`.

pub mod circuit;
pub mod quota;

pub use circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitState, CircuitStatus, FailureKind};
pub use quota::{QuotaState, QuotaTracker, QuotaWindow};
