//! Planner, instruction protocol, resumable executor, and result finisher.
//!
//! A job runs in three stages over a shared work directory:
//! 1. [`planner::plan`] turns the job configuration into P instruction
//!    shards (`todo.<N>.list`) and a root registry;
//! 2. P independent [`executor::execute`] runs interpret one shard each,
//!    resumable at work-unit granularity via a `slab.<N>.last` checkpoint;
//! 3. [`finisher::finish`] consolidates the shard outputs into the
//!    destination descriptor and canonical slab list.

pub mod convert;
pub mod datasource;
pub mod executor;
pub mod finisher;
pub mod instruction;
pub mod layout;
pub mod planner;
pub mod progress;
pub mod roots;

#[cfg(test)]
pub(crate) mod testutil;

pub use executor::{ExecuteSummary, execute};
pub use finisher::{FinishSummary, finish};
pub use planner::{PlanSummary, plan};
pub use progress::{Progress, SilentProgress};
