//! Download of source media from the file-sharing service.

use crate::error::FetchError;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::{path::{Path, PathBuf}, time::Duration};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl MediaFetcher {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url_template: url_template.into(), timeout })
    }

    /// Resolve a file identifier to its download URL.
    pub fn source_url(&self, file_id: &str) -> Result<url::Url, FetchError> {
        let encoded: String = url::form_urlencoded::byte_serialize(file_id.as_bytes()).collect();
        let raw = self.url_template.replace("{id}", &encoded);
        url::Url::parse(&raw).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Download `file_id` into `dest`. Any partial file is removed on failure.
    pub async fn fetch(&self, file_id: &str, dest: &Path) -> Result<FetchedAsset, FetchError> {
        let url = self.source_url(file_id)?;
        debug!(%url, dest = %dest.display(), "downloading");
        match self.download(url, dest).await {
            Ok(asset) => {
                info!(file_id, bytes = asset.bytes, sha256 = %asset.sha256, "download complete");
                Ok(asset)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(dest = %dest.display(), error = %rm, "failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn download(&self, url: url::Url, dest: &Path) -> Result<FetchedAsset, FetchError> {
        let resp = self.client.get(url).send().await.map_err(|e| self.classify(e))?;
        if !resp.status().is_success() { return Err(FetchError::BadStatus(resp.status())); }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut bytes = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let b = chunk.map_err(|e| self.classify(e))?;
            hasher.update(&b);
            bytes += b.len() as u64;
            file.write_all(&b).await?;
        }
        file.flush().await?;

        Ok(FetchedAsset { path: dest.to_path_buf(), bytes, sha256: hex::encode(hasher.finalize()) })
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() { FetchError::Timeout(self.timeout) } else { FetchError::Request(e) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::Path as UrlPath,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use tempfile::TempDir;

    async fn serve_files() -> String {
        let app = Router::new().route(
            "/files/:id",
            get(|UrlPath(id): UrlPath<String>| async move {
                match id.as_str() {
                    "clip" => b"fake video bytes".to_vec().into_response(),
                    "slow" => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        b"too late".to_vec().into_response()
                    }
                    "stalled" => {
                        let first = futures_util::stream::iter([Ok::<_, std::io::Error>(b"partial".to_vec())]);
                        Response::new(Body::from_stream(first.chain(futures_util::stream::pending())))
                    }
                    _ => StatusCode::NOT_FOUND.into_response(),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/files/{{id}}")
    }

    #[test]
    fn source_url_encodes_identifier() {
        let f = MediaFetcher::new(crate::config::DEFAULT_SOURCE_URL_TEMPLATE, Duration::from_secs(5)).unwrap();
        let url = f.source_url("abc&x=1").unwrap();
        assert_eq!(url.as_str(), "https://drive.google.com/uc?export=download&id=abc%26x%3D1");
    }

    #[test]
    fn malformed_template_is_rejected() {
        let f = MediaFetcher::new("not a url {id}", Duration::from_secs(5)).unwrap();
        assert!(matches!(f.source_url("x"), Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn downloads_to_destination() {
        let template = serve_files().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("video_1.mp4");
        let f = MediaFetcher::new(template, Duration::from_secs(5)).unwrap();

        let asset = f.fetch("clip", &dest).await.unwrap();
        assert_eq!(asset.bytes, 16);
        assert_eq!(asset.sha256.len(), 64);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fake video bytes");
    }

    #[tokio::test]
    async fn bad_status_leaves_no_file() {
        let template = serve_files().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("music_1.mp3");
        let f = MediaFetcher::new(template, Duration::from_secs(5)).unwrap();

        let err = f.fetch("missing", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::BadStatus(s) if s == StatusCode::NOT_FOUND));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let template = serve_files().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("video_2.mp4");
        let f = MediaFetcher::new(template, Duration::from_millis(100)).unwrap();

        let err = f.fetch("slow", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(t) if t == Duration::from_millis(100)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn stalled_body_times_out_and_removes_partial_file() {
        let template = serve_files().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("music_2.mp3");
        let f = MediaFetcher::new(template, Duration::from_millis(200)).unwrap();

        let err = f.fetch("stalled", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(!dest.exists());
    }
}
