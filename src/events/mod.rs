//! # Events Module
//!
//! Progress reporting decoupled from any front end.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Extract(ExtractEvent::EntryFinished(outcome)) = event {
//!             println!("{} -> {:?}", outcome.entry, outcome.state);
//!         }
//!     }
//! });
//!
//! pipeline.run_with_events(&sender)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
