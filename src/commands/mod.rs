//! Command handlers module.
//!
//! - `filter.rs`: runs the dedup filter over JSON-lines batches
//! - `state.rs`: inspects and resets job state (status, check, reset)

mod filter;
mod state;

pub use filter::cmd_filter;
pub use state::{cmd_check, cmd_reset, cmd_status};
