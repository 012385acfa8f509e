#![deny(missing_docs)]
//! Spate API contains the module traits and the basic types required
//! to define the api of those traits.
//!
//! Spate fetches content-addressed Merkle-DAG data from a pool of
//! independent, mutually untrusted sources, racing them against each
//! other. This crate defines the contracts between the race scheduler
//! (see the spate_core crate) and the pieces it coordinates: downloader
//! capabilities, traversal specs, and the identity/block types that
//! flow between them.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

mod error;
pub use error::*;

pub mod id;
pub use id::ContentId;

mod block;
pub use block::*;

pub mod traversal;
pub use traversal::*;

pub mod downloader;
pub use downloader::*;

pub mod varint;
