//! Coordinator HTTP client.
//!
//! Every operation is an independent future: callers compose them with
//! `futures::try_join!` and wrap the aggregate in `tokio::time::timeout`.
//! Service info and scene lookups go through a read-through HTTP cache. Jobs,
//! file transfers and uploads bypass it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use http_cache_reqwest::{CACacheManager, Cache, CacheMode, HttpCache, HttpCacheOptions};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use rnode_models::{Job, JobId, RenderServiceInfo, SceneData};

use crate::cache::ResponseCache;
use crate::error::{ApiError, ApiResult};

/// Header carrying the worker's API key on every request.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Body marker distinguishing a deleted job from any other 404.
pub const JOB_NOT_FOUND_MARKER: &str = "Job not found";

/// Response header naming the file for directory downloads.
const FILENAME_HEADER: &str = "x-filename";

const OCTREE_PART: &str = "octree";
const OCTREE_FILE_NAME: &str = "scene.octree2";
const EMITTERGRID_PART: &str = "emittergrid";
const EMITTERGRID_FILE_NAME: &str = "scene.emittergrid";

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Coordinator base URL, e.g. `https://render.example.com/api`
    pub base_url: String,
    /// Value of the `X-Api-Key` header
    pub api_key: String,
    /// Directory holding the HTTP response cache
    pub cache_dir: PathBuf,
    /// Upper bound for the response cache, in bytes
    pub max_cache_bytes: u64,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            cache_dir: PathBuf::from("rs_cache"),
            max_cache_bytes: 512 * 1024 * 1024,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ApiResult<Self> {
        let base_url = std::env::var("RS_MASTER_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        url::Url::parse(&base_url)
            .map_err(|e| ApiError::config(format!("RS_MASTER_URL is not a valid URL: {}", e)))?;

        let max_cache_mb: u64 = std::env::var("RS_CACHE_MAX_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(512);

        Ok(Self {
            base_url,
            api_key: std::env::var("RS_API_KEY").unwrap_or_default(),
            cache_dir: std::env::var("RS_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("rs_cache")),
            max_cache_bytes: max_cache_mb * 1024 * 1024,
            connect_timeout: Duration::from_secs(
                std::env::var("RS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Render service coordinator client.
///
/// Cheap to clone; clones share the connection pool and the response cache.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    cached: ClientWithMiddleware,
    base_url: String,
    cache: ResponseCache,
}

impl ApiClient {
    /// Create a new client and trim the response cache to its budget.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let mut api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ApiError::config("API key is not a valid header value"))?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), api_key);

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("rnode-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let cache = ResponseCache::new(config.cache_dir.clone(), config.max_cache_bytes);
        if let Err(e) = cache.prune() {
            warn!(error = %e, "Failed to prune HTTP response cache at startup");
        }

        let cached = ClientBuilder::new(http.clone())
            .with(Cache(HttpCache {
                mode: CacheMode::Default,
                manager: CACacheManager {
                    path: config.cache_dir,
                },
                options: HttpCacheOptions::default(),
            }))
            .build();

        Ok(Self {
            http,
            cached,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> ApiResult<Self> {
        Self::new(ApiConfig::from_env()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The response cache backing JSON lookups.
    pub fn response_cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Resolve a coordinator path; absolute URLs are used as given.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Fetch service metadata.
    pub async fn get_info(&self) -> ApiResult<RenderServiceInfo> {
        let response = self.cached.get(self.url("/info")).send().await?;
        let response = expect_status(response, StatusCode::OK, "render service info download")?;
        read_json(response).await
    }

    /// Fetch a job. `Ok(None)` means the coordinator deleted it.
    ///
    /// Never served from the response cache: the cancellation flag must be
    /// current.
    pub async fn get_job(&self, job_id: &JobId) -> ApiResult<Option<Job>> {
        let url = self.url(&format!("/jobs/{}", urlencoding::encode(job_id.as_str())));
        let response = self
            .http
            .get(url)
            .send()
            .instrument(info_span!("get_job", job_id = %job_id))
            .await?;

        match response.status() {
            StatusCode::OK => read_json(response).await.map(Some),
            StatusCode::NOT_FOUND => {
                let body = response.text().await?;
                if body.contains(JOB_NOT_FOUND_MARKER) {
                    debug!(job_id = %job_id, "Job deleted on coordinator");
                    Ok(None)
                } else {
                    Err(ApiError::unexpected_status(
                        "job download",
                        StatusCode::NOT_FOUND,
                    ))
                }
            }
            status => Err(ApiError::unexpected_status("job download", status)),
        }
    }

    /// Fetch the scene description document of a job.
    pub async fn get_scene(&self, job: &Job) -> ApiResult<serde_json::Value> {
        let response = self.cached.get(self.url(&job.scene_url)).send().await?;
        let response = expect_status(response, StatusCode::OK, "scene download")?;
        read_json(response).await
    }

    /// Download `path` into `dest`.
    ///
    /// The body is streamed into a sibling temporary file that is renamed into
    /// place on success, so `dest` never holds a partial download.
    pub async fn download_file(&self, path: &str, dest: &Path) -> ApiResult<PathBuf> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = expect_status(response, StatusCode::OK, format!("download of {}", path))?;
        write_body(response, dest).await?;
        Ok(dest.to_path_buf())
    }

    /// Download `path` into `dir`, named by the `X-Filename` response header.
    pub async fn download_to_dir(&self, path: &str, dir: &Path) -> ApiResult<PathBuf> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = expect_status(response, StatusCode::OK, format!("download of {}", path))?;

        let file_name = response
            .headers()
            .get(FILENAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_os_string())
            .ok_or_else(|| ApiError::MissingHeader("X-Filename".to_string()))?;

        let dest = dir.join(file_name);
        write_body(response, &dest).await?;
        Ok(dest)
    }

    /// Download a texture pack by identifier.
    pub async fn download_texture_pack(
        &self,
        texture_pack_id: &str,
        dest: &Path,
    ) -> ApiResult<PathBuf> {
        let path = format!("/texturepacks/{}", urlencoding::encode(texture_pack_id));
        self.download_file(&path, dest).await
    }

    /// Upload render results for a job. Success is `204 No Content`.
    pub async fn upload_scene_data(&self, job_id: &JobId, data: SceneData) -> ApiResult<()> {
        let mut form = Form::new().part(OCTREE_PART, binary_part(data.octree, OCTREE_FILE_NAME)?);
        if let Some(emitter_grid) = data.emitter_grid {
            form = form.part(
                EMITTERGRID_PART,
                binary_part(emitter_grid, EMITTERGRID_FILE_NAME)?,
            );
        }

        let url = self.url(&format!("/jobs/{}/files", urlencoding::encode(job_id.as_str())));
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .instrument(info_span!("upload_scene_data", job_id = %job_id))
            .await?;

        expect_status(response, StatusCode::NO_CONTENT, "render job update")?;
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Pass the response through if it has the expected status.
///
/// Otherwise the response is dropped, which closes its body stream.
fn expect_status(
    response: Response,
    expected: StatusCode,
    what: impl Into<String>,
) -> ApiResult<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(ApiError::unexpected_status(what, response.status()))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn write_body(response: Response, dest: &Path) -> ApiResult<()> {
    // Removed on every exit path, including when the caller drops this future.
    let mut part = PartialFile::new(partial_path(dest));

    let mut file = tokio::fs::File::create(part.path()).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(part.path(), dest).await?;
    part.disarm();
    Ok(())
}

/// Temporary download target, deleted on drop unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".part-{}", Uuid::new_v4()));
    dest.with_file_name(name)
}

fn binary_part(bytes: Vec<u8>, file_name: &'static str) -> ApiResult<Part> {
    Ok(Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/octet-stream")?)
}
