use crate::core::workspace::SourceWorkspace;
use crate::utils::error::{EtlError, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// 圖幅快取目錄的環境變數
pub const TILE_CACHE_ENV: &str = "AOI_ETL_TILE_CACHE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOrigin {
    Cache,
    Network,
}

/// 設定值優先，其次環境變數
pub fn resolve_cache_dir(configured: Option<&str>) -> Option<PathBuf> {
    configured
        .map(PathBuf::from)
        .or_else(|| std::env::var(TILE_CACHE_ENV).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from))
}

/// 串流下載並以 Content-Length 驗證完整性；失敗時刪除不完整的檔案
pub async fn download_verified(
    client: &Client,
    url: &str,
    destination: &Path,
    timeout: Duration,
) -> Result<u64> {
    let result = stream_to_file(client, url, destination, timeout).await;
    if result.is_err() && destination.exists() {
        if let Err(e) = tokio::fs::remove_file(destination).await {
            tracing::warn!("⚠️ Could not delete partial file {}: {}", destination.display(), e);
        } else {
            tracing::debug!("Deleted partial file {}", destination.display());
        }
    }
    result
}

async fn stream_to_file(client: &Client, url: &str, destination: &Path, timeout: Duration) -> Result<u64> {
    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?;
    let expected = response.content_length();

    let mut file = tokio::fs::File::create(destination).await?;
    let mut received: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.flush().await?;

    match expected {
        Some(expected) if expected != received => Err(EtlError::DownloadVerificationError {
            url: url.to_string(),
            expected,
            received,
        }),
        _ if received == 0 => Err(EtlError::DownloadVerificationError {
            url: url.to_string(),
            expected: expected.unwrap_or(0),
            received,
        }),
        _ => Ok(received),
    }
}

/// 具快取的圖幅下載器
#[derive(Debug, Clone)]
pub struct TileDownloader {
    client: Client,
    timeout: Duration,
    cache_dir: Option<PathBuf>,
}

impl TileDownloader {
    pub fn new(client: Client, timeout: Duration, cache_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            timeout,
            cache_dir,
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// 快取命中時不連網；只有驗證完成的下載才寫入快取
    pub async fn fetch(&self, url: &str, file_name: &str, work_dir: &Path) -> Result<(PathBuf, DownloadOrigin)> {
        if let Some(cached) = self.cached(file_name) {
            tracing::debug!("Cache hit: {}", cached.display());
            return Ok((cached, DownloadOrigin::Cache));
        }

        let destination = work_dir.join(file_name);
        let bytes = download_verified(&self.client, url, &destination, self.timeout).await?;
        tracing::debug!("Downloaded {} ({} bytes)", url, bytes);

        if let Some(cache_dir) = &self.cache_dir {
            if let Err(e) = store_in_cache(&destination, cache_dir, file_name).await {
                tracing::warn!("⚠️ Could not cache {} in {}: {}", file_name, cache_dir.display(), e);
            }
        }

        Ok((destination, DownloadOrigin::Network))
    }

    fn cached(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.cache_dir.as_ref()?.join(file_name);
        let len = std::fs::metadata(&path).ok()?.len();
        (len > 0).then_some(path)
    }
}

/// 先寫入暫存名稱再改名
async fn store_in_cache(source: &Path, cache_dir: &Path, file_name: &str) -> Result<()> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let partial = cache_dir.join(format!(".{}.partial", file_name));
    let copied = match tokio::fs::copy(source, &partial).await {
        Ok(_) => tokio::fs::rename(&partial, cache_dir.join(file_name)).await,
        Err(e) => Err(e),
    };
    if copied.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    copied.map_err(EtlError::IoError)
}

/// 單一圖幅的下載請求
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub code: String,
    pub url: String,
    pub file_name: String,
}

/// 逐一下載；失敗的圖幅記錄警告後略過。網路下載的檔案交由 workspace 管理
pub async fn fetch_tiles(
    downloader: &TileDownloader,
    requests: &[TileRequest],
    workspace: &mut SourceWorkspace,
) -> Vec<(String, PathBuf)> {
    let mut fetched = Vec::with_capacity(requests.len());
    for (position, request) in requests.iter().enumerate() {
        tracing::info!(
            "⬇️ [{}] Tile {}/{}: {}",
            workspace.source_id(),
            position + 1,
            requests.len(),
            request.code
        );
        let work_dir = workspace.dir().to_path_buf();
        match downloader.fetch(&request.url, &request.file_name, &work_dir).await {
            Ok((path, origin)) => {
                if origin == DownloadOrigin::Network {
                    workspace.track(path.clone());
                }
                fetched.push((request.code.clone(), path));
            }
            Err(e) => tracing::warn!(
                "⚠️ [{}] Tile {} failed: {}",
                workspace.source_id(),
                request.code,
                e
            ),
        }
    }
    fetched
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_writes_file_and_cache() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/MNT_21L14NE.tif");
            then.status(200).body(vec![7u8; 64]);
        });

        let work = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let downloader = TileDownloader::new(
            Client::new(),
            Duration::from_secs(10),
            Some(cache.path().to_path_buf()),
        );

        let url = server.url("/MNT_21L14NE.tif");
        let (path, origin) = downloader.fetch(&url, "MNT_21L14NE.tif", work.path()).await.unwrap();
        assert_eq!(origin, DownloadOrigin::Network);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
        assert!(cache.path().join("MNT_21L14NE.tif").exists());

        let (cached, origin) = downloader.fetch(&url, "MNT_21L14NE.tif", work.path()).await.unwrap();
        assert_eq!(origin, DownloadOrigin::Cache);
        assert_eq!(cached, cache.path().join("MNT_21L14NE.tif"));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_leftover_partial_cache_copy_is_not_a_hit() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/MNT_21L14SO.tif");
            then.status(200).body(vec![3u8; 32]);
        });

        let work = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let partial = cache.path().join(".MNT_21L14SO.tif.partial");
        std::fs::write(&partial, [3u8; 10]).unwrap();
        let downloader = TileDownloader::new(
            Client::new(),
            Duration::from_secs(10),
            Some(cache.path().to_path_buf()),
        );

        let url = server.url("/MNT_21L14SO.tif");
        let (_, origin) = downloader.fetch(&url, "MNT_21L14SO.tif", work.path()).await.unwrap();
        assert_eq!(origin, DownloadOrigin::Network);
        mock.assert_hits(1);

        assert!(!partial.exists());
        let cached = cache.path().join("MNT_21L14SO.tif");
        assert_eq!(std::fs::metadata(&cached).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.tif");
            then.status(404);
        });

        let work = TempDir::new().unwrap();
        let destination = work.path().join("missing.tif");
        let result = download_verified(
            &Client::new(),
            &server.url("/missing.tif"),
            &destination,
            Duration::from_secs(10),
        )
        .await;
        assert!(result.is_err());
        assert!(!destination.exists());
    }

    #[test]
    fn test_configured_cache_dir_wins() {
        assert_eq!(
            resolve_cache_dir(Some("/var/cache/tiles")),
            Some(PathBuf::from("/var/cache/tiles"))
        );
    }
}
