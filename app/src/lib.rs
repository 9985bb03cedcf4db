//! Seatguard load-test runner.
//!
//! Runs the same contention scenario against each configured
//! concurrency-control strategy and reports whether the counter and the claim
//! ledger stayed consistent.
//!
//! ```bash
//! STRATEGIES=unsynchronized,record_lock,optimistic STOCK=100 REQUESTS=1000 cargo run -p seatguard
//! ```

pub mod config;
pub mod wiring;

pub use config::{Config, Strategy};
pub use load_test::{Mode, ScenarioReport};
