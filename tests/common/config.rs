//! Test configuration helpers for creating downloaders rooted in a temp directory

use std::time::Duration;
use tempfile::TempDir;
use media_dl::{Config, MediaDownloader};

/// Config with every directory inside `root` and short pacing windows
pub fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.path().join("downloads");
    config.download.temp_dir = root.path().join("temp");
    config.events.update_interval = Duration::from_millis(20);
    config.events.intake_interval = Duration::from_millis(10);
    config.http.connect_timeout = Duration::from_secs(5);
    config
}

/// Create a downloader with the built-in HTTP collaborators
///
/// Returns the downloader and the tempdir (which must be kept alive).
pub async fn create_http_downloader() -> (MediaDownloader, TempDir) {
    let root = tempfile::tempdir().expect("failed to create temp dir");
    let downloader = MediaDownloader::new(test_config(&root))
        .await
        .expect("failed to create downloader");
    (downloader, root)
}
