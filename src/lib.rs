//! Tails a growing log file and broadcasts newly appended lines to any number
//! of viewers.
//!
//! The crate has two halves:
//!
//! * [`TailDetector`] owns the read cursor of one file. Each check cycle
//!   reopens the file, notices truncation (the file got shorter) and rotation
//!   (the file is gone and a newer log file sits next to it), and returns the
//!   lines completed since the last cycle as a [`LineBatch`].
//! * [`Hub`] fans each batch out to every [`Subscription`] without ever
//!   waiting on one. A subscriber that lets its bounded queue fill up is
//!   evicted and its stream ends; everyone else carries on.
//!
//! With the `server` feature (on by default) the [`server`] module serves
//! both over HTTP, streaming lines as server-sent events.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tailcast::{Hub, TailDetector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Hub::new(100);
//!     let mut viewer = hub.subscribe();
//!
//!     let detector = TailDetector::new("/var/log/app.log");
//!     let tail_hub = hub.clone();
//!     tokio::spawn(async move {
//!         detector
//!             .run(&tail_hub, Duration::from_millis(300), None)
//!             .await
//!     });
//!
//!     while let Some(line) = viewer.recv().await {
//!         println!("{}", line);
//!     }
//! }
//! ```
//!
//! ## Caveats
//!
//! Truncation is only noticed when the file is shorter than the cursor at
//! check time. A file truncated and then refilled past the old cursor within
//! one poll interval looks like plain growth.

pub mod config;
mod error;
mod events;
mod hub;
#[cfg(feature = "server")]
pub mod server;
mod tail;

pub use config::{Config, Source};
pub use error::{Error, Result};
pub use events::ChangeNotifier;
pub use hub::{Hub, SubscriberId, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use tail::{
    find_most_recent_log_file, is_log_file, LineBatch, TailDetector, DEFAULT_MAX_LINE_BYTES,
    DEFAULT_POLL_INTERVAL,
};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
