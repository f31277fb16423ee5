//! # takeout-dedup CLI
//!
//! Command-line interface for the takeout extractor.
//!
//! ## Usage
//! ```bash
//! takeout-dedup analyze ~/Downloads/takeout ~/Pictures/Library
//! takeout-dedup extract ~/Downloads/takeout ~/Pictures/Library --json
//! ```

mod cli;

use takeout_dedup::Result;

fn main() -> Result<()> {
    takeout_dedup::init_tracing();
    cli::run()
}
