//! Pass-through collaborators used when no real resolver or cache is wired in

use async_trait::async_trait;

use super::traits::{VideoCache, VideoResolver};
use crate::types::Link;

/// Resolver that treats the original URL as directly playable
///
/// Links that are already resolved are returned unchanged.
///
/// # Examples
///
/// ```
/// use media_dl::sources::{PassthroughResolver, VideoResolver};
/// use media_dl::Link;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let link = PassthroughResolver.resolve(&Link::video("https://v.example.com/a.mp4")).await?;
/// assert_eq!(link.resolved_video_url.as_deref(), Some("https://v.example.com/a.mp4"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl VideoResolver for PassthroughResolver {
    async fn resolve(&self, link: &Link) -> crate::Result<Link> {
        if link.resolved_video_url.is_some() {
            return Ok(link.clone());
        }
        Ok(link
            .clone()
            .with_resolved_video_url(link.original_url.clone()))
    }
}

/// Cache that never holds anything; the proxy URL is the source URL itself
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVideoCache;

impl VideoCache for NoVideoCache {
    fn is_cached(&self, _url: &str) -> bool {
        false
    }

    fn proxy_url(&self, url: &str) -> String {
        url.to_string()
    }
}
