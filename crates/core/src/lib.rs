#![deny(missing_docs)]
//! Spate core: the race scheduler.
//!
//! A [Client] owns a pool of downloader capabilities. One call to
//! [Client::download] races concurrent attempts against every
//! configured source for the same traversal, verifies every received
//! block against its claimed identity and the traversal, deduplicates
//! overlapping delivery, and fails attempts over to unused sources so
//! the call survives any individual source being slow, unavailable, or
//! malicious.

pub mod race;
pub use race::{Client, DownloadStream, RaceConfig};

pub mod everything;
pub use everything::EverythingSpec;

pub mod mem;
