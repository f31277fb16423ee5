//! # Extract Module
//!
//! The per-entry extraction state machine.
//!
//! ## Per entry
//! 1. A [`Decision`] arrives from planning: extract to a path, skip as a
//!    duplicate, skip as already present, or fail as unreadable
//! 2. For extraction, a `Planned` record is committed first, then the entry
//!    is streamed into a hidden temporary next to its target, checked
//!    against the stored size and CRC32, read back and fingerprinted, and
//!    only then moved into place
//! 3. Write and verification failures are retried a bounded number of
//!    times before the record becomes `Failed`
//!
//! The library never deletes destination content or archives. Archive
//! cleanup is decided by [`decide_cleanup`] and carried out by the caller.

mod cleanup;
mod decision;
mod extractor;
mod writer;

pub use cleanup::{decide_cleanup, CleanupAction, CleanupMode};
pub use decision::{Decision, PlannedEntry};
pub use extractor::{ArchiveReport, ExtractOptions, Extractor};
pub use writer::write_entry;
