//! # Takeout Dedup
//!
//! Deduplicating, resumable extractor for photo/video takeout archives.
//!
//! ## Core Philosophy
//! - **Never delete** - the library has no operation that removes destination content
//! - **Exactly once** - every archive entry lands at the destination at most once
//! - **Resumable** - a persisted manifest makes every run safe to interrupt and repeat
//!
//! ## Architecture
//! The library is split into a core engine (UI-agnostic) and presentation layers:
//! - `core` - archive reading, fingerprinting, caching, dedup, planning, extraction
//! - `events` - Event-driven progress reporting
//! - `error` - Error taxonomy
//! - `cli` - Command-line interface (binary only)

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, TakeoutError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. Filtering is
/// controlled through `RUST_LOG`.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    // A subscriber may already be installed by an embedding application
    let _ = tracing::subscriber::set_global_default(subscriber);
}
