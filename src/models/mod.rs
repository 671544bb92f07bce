//! Data models for deltafetch.
//!
//! Work units, results and the output stream that flows through the filter,
//! plus the fingerprint and event types the seen-set is keyed and observed by.

mod events;
mod fingerprint;
mod job;
mod work_unit;

pub use events::{DedupEvent, DedupEventKind, EventMeta};
pub use fingerprint::Fingerprint;
pub use job::Job;
pub use work_unit::{Item, OVERRIDE_KEY_META, Output, WorkUnit};
