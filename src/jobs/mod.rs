//! Background work: job execution and expiry sweeps.
//!
//! - `executor`: runs one transformation per session on a bounded pool
//! - `reaper`: periodic removal of sessions idle past their TTL

pub mod executor;
pub mod reaper;

pub use executor::JobExecutor;
pub use reaper::{ExpirationReaper, SweepReport, spawn_reaper};
