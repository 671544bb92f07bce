//! Deduplication services.
//!
//! Services sit between the storage layer and the crawl engine: fingerprinting
//! turns work units into keys, the seen-set policy decides and records, and the
//! filter applies those decisions to a stream of outputs.

mod delta_fetch;
mod fingerprint;
mod path_manager;
mod seen_set;

pub use delta_fetch::{
    DedupFilter, JobLifecycle, OutputStage, Passthrough, PipelineStage, install,
};
pub use fingerprint::{Fingerprinter, RequestFingerprinter, canonicalize_url};
pub use path_manager::{PathManager, STATE_FILE_EXTENSION};
pub use seen_set::{SeenSetPolicy, decode_timestamp, encode_timestamp};
