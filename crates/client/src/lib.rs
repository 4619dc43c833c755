//! Fetch pipeline, artifact transcoding, and retry scheduling for pixmirror.
//!
//! This crate provides the network-facing half of the caching proxy: the
//! HTTP fetch client and size probe, the image resize/transcode step, and
//! the `ImageCacheProxy` facade that the embedding application drives.

pub mod fetch;
pub mod service;
pub mod transcode;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, HttpImageFetcher, ImageFetcher};
pub use service::{ImageCacheProxy, RetryOutcome};
pub use transcode::ResizeLimits;
