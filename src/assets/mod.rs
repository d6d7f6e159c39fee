//! Model Asset Store: fetches the encoder/decoder binaries and keeps them
//! in a local cache.
//!
//! Lookup order for a remote URL:
//! 1. In-process memo (a previous successful fetch of the same URL)
//! 2. On-disk cache keyed by the URL's filename
//! 3. Network download with a bounded timeout and exponential backoff
//!
//! Concurrent fetches of the same URL share one download: the second caller
//! waits on the per-URL guard and receives the first caller's result.

mod cache;
mod retry;

pub use cache::AssetCache;
pub use retry::RetryConfig;

use crate::error::AssetError;
use reqwest::Url;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A downloaded model binary. Immutable once fetched.
#[derive(Debug)]
pub struct ModelAsset {
    pub name: String,
    pub bytes: Vec<u8>,
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<ModelAsset>>>>;

/// Where a model URL points
#[derive(Debug, Clone, PartialEq)]
enum ModelSource {
    Local(PathBuf),
    Remote { url: Url, name: String },
}

impl ModelSource {
    fn parse(location: &str) -> Result<Self, AssetError> {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => return Ok(ModelSource::Local(PathBuf::from(location))),
        };

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(ModelSource::Local)
                .map_err(|_| AssetError::InvalidUrl(location.to_string())),
            "http" | "https" => {
                let name = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|name| is_safe_file_name(name))
                    .ok_or_else(|| AssetError::InvalidUrl(location.to_string()))?
                    .to_string();
                Ok(ModelSource::Remote { url, name })
            }
            _ => Err(AssetError::InvalidUrl(location.to_string())),
        }
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '\\')
}

/// Fetches and caches model binaries
pub struct ModelStore {
    /// `None` when the HTTP client could not be built; local paths still load
    client: Option<reqwest::Client>,
    cache: Option<AssetCache>,
    retry: RetryConfig,
    timeout: Duration,
    inflight: Mutex<HashMap<String, Slot>>,
}

impl ModelStore {
    /// Create a store. If the cache directory cannot be opened the store
    /// still works, it just downloads every time.
    pub async fn new(cache_dir: Option<&Path>, retry: RetryConfig, timeout: Duration) -> Self {
        let cache = match cache_dir {
            Some(dir) => match AssetCache::open(dir).await {
                Ok(cache) => {
                    tracing::info!("Model cache at {}", cache.dir().display());
                    Some(cache)
                }
                Err(e) => {
                    tracing::warn!(
                        "Model cache unavailable at {} ({}), downloading without caching",
                        dir.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let client = match reqwest::Client::builder()
            .user_agent(concat!("maskmotion/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!("Failed to build HTTP client, downloads disabled: {}", e);
                None
            }
        };

        Self {
            client,
            cache,
            retry,
            timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Fetch a model by URL (or local path). Idempotent.
    ///
    /// Any error means the model is unavailable; callers degrade instead of
    /// failing hard.
    pub async fn fetch_model(&self, location: &str) -> Result<Arc<ModelAsset>, AssetError> {
        let slot = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(inflight.entry(location.to_string()).or_default())
        };

        let mut guard = slot.lock().await;
        if let Some(asset) = guard.as_ref() {
            tracing::debug!("Model {} already fetched", asset.name);
            return Ok(Arc::clone(asset));
        }

        let asset = Arc::new(self.acquire(location).await?);
        *guard = Some(Arc::clone(&asset));
        Ok(asset)
    }

    async fn acquire(&self, location: &str) -> Result<ModelAsset, AssetError> {
        match ModelSource::parse(location)? {
            ModelSource::Local(path) => {
                tracing::info!("Loading model from {}", path.display());
                let bytes = tokio::fs::read(&path).await?;
                if bytes.is_empty() {
                    return Err(AssetError::Empty(path.display().to_string()));
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| location.to_string());
                Ok(ModelAsset { name, bytes })
            }
            ModelSource::Remote { url, name } => {
                if let Some(bytes) = self.read_cached(&name).await {
                    tracing::info!("Model {} served from cache ({} bytes)", name, bytes.len());
                    return Ok(ModelAsset { name, bytes });
                }

                let bytes = self.download_with_retry(&url).await?;
                self.write_cached(&name, &bytes).await;
                Ok(ModelAsset { name, bytes })
            }
        }
    }

    async fn read_cached(&self, name: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        match cache.read(name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to read cached model {}: {}", name, e);
                None
            }
        }
    }

    async fn write_cached(&self, name: &str, bytes: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.write(name, bytes).await {
                tracing::warn!("Failed to cache model {}: {}", name, e);
            }
        }
    }

    async fn download_with_retry(&self, url: &Url) -> Result<Vec<u8>, AssetError> {
        let attempts = self.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.download_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Download of {} failed (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(AssetError::Exhausted {
            url: url.to_string(),
            attempts,
            last: last_error,
        })
    }

    async fn download_once(&self, url: &Url) -> Result<Vec<u8>, AssetError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AssetError::NoClient(url.to_string()))?;
        tracing::info!("Downloading {}", url);

        let response = client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AssetError::Empty(url.to_string()));
        }

        tracing::info!("Downloaded {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[test]
    fn test_parse_sources() {
        assert_eq!(
            ModelSource::parse("models/encoder.onnx").unwrap(),
            ModelSource::Local(PathBuf::from("models/encoder.onnx"))
        );
        match ModelSource::parse("https://host.test/sam2/decoder.onnx").unwrap() {
            ModelSource::Remote { name, .. } => assert_eq!(name, "decoder.onnx"),
            other => panic!("expected remote source, got {other:?}"),
        }
        assert!(ModelSource::parse("https://host.test/").is_err());
        assert!(ModelSource::parse("ftp://host.test/encoder.onnx").is_err());
    }

    #[tokio::test]
    async fn test_retries_then_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/encoder.onnx"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/encoder.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = ModelStore::new(Some(temp.path()), fast_retry(3), Duration::from_secs(5)).await;
        let url = format!("{}/encoder.onnx", server.uri());

        let asset = store.fetch_model(&url).await.unwrap();
        assert_eq!(asset.name, "encoder.onnx");
        assert_eq!(asset.bytes, b"weights");
        assert_eq!(std::fs::read(temp.path().join("encoder.onnx")).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let store = ModelStore::new(None, fast_retry(2), Duration::from_secs(5)).await;
        let err = store
            .fetch_model(&format!("{}/decoder.onnx", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let store = ModelStore::new(None, fast_retry(3), Duration::from_secs(5)).await;
        let err = store
            .fetch_model(&format!("{}/missing.onnx", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("encoder.onnx"), b"cached").unwrap();
        let store = ModelStore::new(Some(temp.path()), fast_retry(0), Duration::from_secs(5)).await;

        let asset = store
            .fetch_model(&format!("{}/encoder.onnx", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.bytes, b"cached");
    }

    #[tokio::test]
    async fn test_empty_cache_entry_redownloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("encoder.onnx"), b"").unwrap();
        let store = ModelStore::new(Some(temp.path()), fast_retry(0), Duration::from_secs(5)).await;

        let asset = store
            .fetch_model(&format!("{}/encoder.onnx", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.bytes, b"fresh");
    }

    #[tokio::test]
    async fn test_concurrent_fetches_download_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"shared".to_vec())
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        // No cache: only the in-flight guard prevents the second download
        let store = ModelStore::new(None, fast_retry(0), Duration::from_secs(5)).await;
        assert!(!store.is_caching());
        let url = format!("{}/decoder.onnx", server.uri());

        let (a, b) = tokio::join!(store.fetch_model(&url), store.fetch_model(&url));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_falls_back() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/encoder.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let store = ModelStore::new(Some(&blocker), fast_retry(0), Duration::from_secs(5)).await;
        assert!(!store.is_caching());

        let asset = store
            .fetch_model(&format!("{}/encoder.onnx", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.bytes, b"weights");
        assert_eq!(std::fs::read(&blocker).unwrap(), b"file");
    }

    #[tokio::test]
    async fn test_failed_cache_write_still_returns_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/decoder.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("models");
        let store = ModelStore::new(Some(&dir), fast_retry(0), Duration::from_secs(5)).await;
        assert!(store.is_caching());

        // Swap the opened cache directory for a plain file so every write fails
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"").unwrap();

        let asset = store
            .fetch_model(&format!("{}/decoder.onnx", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.bytes, b"weights");
        assert!(dir.is_file());
    }

    #[tokio::test]
    async fn test_slow_download_times_out_each_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let store = ModelStore::new(None, fast_retry(1), Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        let err = store
            .fetch_model(&format!("{}/encoder.onnx", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, AssetError::Exhausted { attempts: 2, .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_local_path() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("decoder.onnx");
        std::fs::write(&model, b"local").unwrap();

        let store = ModelStore::new(None, fast_retry(0), Duration::from_secs(5)).await;
        let asset = store.fetch_model(model.to_str().unwrap()).await.unwrap();
        assert_eq!(asset.name, "decoder.onnx");
        assert_eq!(asset.bytes, b"local");
    }
}
