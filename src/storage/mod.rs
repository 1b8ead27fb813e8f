//! Blob storage backends.
//!
//! The [`backend::BlobStore`] trait abstracts over the blob service the
//! portal fronts.  Implementations are the Azure Blob REST client and an
//! in-process versioned store used for local runs and tests.

pub mod azure;
pub mod backend;
pub mod memory;
pub mod stream;
