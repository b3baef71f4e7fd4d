//! Stitch kubehub: the list-then-watch core.
//!
//! [`list_snapshot`] takes a point-in-time listing and the collection version it
//! was taken at. [`Subscriber`] resumes from that version and dispatches every
//! change to an [`EventSink`](stitch_core::EventSink) until cancelled or the
//! stream ends. Both talk to the API server through the [`ListerWatcher`] seam.

#![forbid(unsafe_code)]

mod decode;
mod snapshot;
mod subscriber;
mod transport;

pub use decode::decode;
pub use snapshot::list_snapshot;
pub use subscriber::{list_then_watch, Subscriber};
pub use transport::{EventStream, KubeListerWatcher, ListerWatcher, RawList};
