//! Progress source adapters
//!
//! Each adapter wraps one fetch mechanism and turns it into a uniform,
//! finite sequence of [`DownloadJob`](crate::types::DownloadJob) snapshots for
//! a single link, pushed through a [`JobEmitter`]:
//!
//! - [`ImageSource`] - adapts an [`ImageFetcher`] event stream
//! - [`VideoSource`] - streams through a [`VideoCache`] proxy with a cache-hit fast path
//!
//! Every run ends with exactly one `Downloaded` or `Failed` snapshot unless the
//! job is cancelled, in which case it ends silently.

mod emitter;
mod http;
mod image;
mod noop;
mod traits;
mod video;

pub use emitter::{JobEmitter, progress_percent};
pub use http::HttpImageFetcher;
pub use image::ImageSource;
pub use noop::{NoVideoCache, PassthroughResolver};
pub use traits::{FetchEvent, ImageFetcher, VideoCache, VideoResolver};
pub use video::VideoSource;
