//! HTTP handlers for the blob API.

pub mod blobs;
