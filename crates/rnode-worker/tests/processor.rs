//! Assignment processor tests against a mock coordinator.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rnode_api::{ApiClient, ApiConfig};
use rnode_models::SceneData;
use rnode_queue::testing::{MemoryDelivery, Resolution, ResolutionLog};
use rnode_render::testing::StubRenderEngine;
use rnode_render::{RenderEngine, RenderRequest, RenderResult};
use rnode_worker::{AssignmentProcessor, Disposition, ProcessorSettings, TexturePackCache};

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    server: MockServer,
    api: ApiClient,
    tmp: TempDir,
    settings: ProcessorSettings,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let api = ApiClient::new(ApiConfig {
            base_url: server.uri(),
            api_key: "k".to_string(),
            cache_dir: tmp.path().join("cache"),
            max_cache_bytes: 1024 * 1024,
            ..Default::default()
        })
        .unwrap();
        let settings = ProcessorSettings {
            job_dir: tmp.path().join("jobs"),
            job_fetch_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(10),
            texture_pack_timeout: Duration::from_secs(10),
        };
        Self {
            server,
            api,
            tmp,
            settings,
        }
    }

    fn texture_dir(&self) -> PathBuf {
        self.tmp.path().join("texturepacks")
    }

    fn processor(&self, engine: Arc<dyn RenderEngine>) -> AssignmentProcessor {
        AssignmentProcessor::new(
            self.api.clone(),
            engine,
            TexturePackCache::new(self.texture_dir()),
            self.settings.clone(),
        )
    }

    fn job_dir_entries(&self) -> usize {
        match std::fs::read_dir(&self.settings.job_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    async fn mount_job(&self, body: serde_json::Value) {
        let id = body["id"].as_str().unwrap().to_string();
        Mock::given(method("GET"))
            .and(path(format!("/jobs/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_inputs(&self) {
        Mock::given(method("GET"))
            .and(path("/s/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "user scene",
                "world": {"path": "C:\\saves\\world", "dimension": 0},
                "sppTarget": 1000
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/f/1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1024]))
            .mount(&self.server)
            .await;
    }

    async fn mount_upload(&self, status: u16, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/jobs/abc/files"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected)
            .mount(&self.server)
            .await;
    }
}

fn job_json(texture_pack: Option<&str>, cancelled: bool) -> serde_json::Value {
    serde_json::json!({
        "id": "abc",
        "cancelled": cancelled,
        "texturePack": texture_pack,
        "regionFileUrls": [{"name": "r.0.0.mca", "url": "/f/1"}],
        "sceneUrl": "/s/abc"
    })
}

fn delivery(log: &ResolutionLog, body: &str) -> rnode_queue::BoxedDelivery {
    MemoryDelivery::new(1, body.as_bytes().to_vec(), log).boxed()
}

fn octree_only() -> Arc<StubRenderEngine> {
    Arc::new(StubRenderEngine::returning(SceneData::new(
        b"OCTREE".to_vec(),
        None,
    )))
}

/// Engine that records what the working directory looked like when called.
#[derive(Default)]
struct InspectingEngine {
    seen: Mutex<Option<(serde_json::Value, Vec<u8>, RenderRequest)>>,
}

#[async_trait]
impl RenderEngine for InspectingEngine {
    async fn generate_scene_data(&self, request: &RenderRequest) -> RenderResult<SceneData> {
        let scene: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&request.scene_description)?).unwrap();
        let region = std::fs::read(request.world_directory.join("region").join("r.0.0.mca"))?;
        *self.seen.lock().unwrap() = Some((scene, region, request.clone()));
        Ok(SceneData::new(b"OCTREE".to_vec(), Some(b"GRID".to_vec())))
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_end_to_end_assignment() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, false)).await;
    h.mount_inputs().await;
    h.mount_upload(204, 1).await;

    let engine = Arc::new(InspectingEngine::default());
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(log.get(1), Some(Resolution::Ack));

    let (scene, region, request) = engine.seen.lock().unwrap().take().unwrap();
    assert_eq!(scene["name"], "scene");
    assert_eq!(scene["world"]["path"], "");
    assert_eq!(scene["sppTarget"], 1000);
    assert_eq!(region, vec![1u8; 1024]);
    assert_eq!(request.dimension, 0);
    assert!(request.texture_pack.is_none());
    assert_eq!(
        request.scene_description.parent(),
        Some(request.world_directory.as_path())
    );
    assert!(request.world_directory.starts_with(&h.settings.job_dir));

    let requests = h.server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/jobs/abc/files")
        .unwrap();
    let body = String::from_utf8_lossy(&upload.body);
    assert!(body.contains("name=\"octree\""));
    assert!(body.contains("name=\"emittergrid\""));

    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_job_without_regions_still_renders() {
    let h = Harness::new().await;
    let mut job = job_json(None, false);
    job["regionFileUrls"] = serde_json::json!([]);
    h.mount_job(job).await;
    h.mount_inputs().await;
    h.mount_upload(204, 1).await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(engine.calls().len(), 1);
}

// =============================================================================
// Early exits
// =============================================================================

#[tokio::test]
async fn test_deleted_job_is_acked_without_work() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/jobs/abc"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Job not found"))
        .mount(&h.server)
        .await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(log.get(1), Some(Resolution::Ack));
    assert!(engine.calls().is_empty());
    assert_eq!(h.server.received_requests().await.unwrap().len(), 1);
    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_cancelled_job_is_acked_without_work() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, true)).await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    assert!(engine.calls().is_empty());
    assert_eq!(h.server.received_requests().await.unwrap().len(), 1);
    assert_eq!(h.job_dir_entries(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_undecodable_body_is_requeued() {
    let h = Harness::new().await;

    let log = ResolutionLog::new();
    let disposition = h
        .processor(octree_only())
        .process(delivery(&log, "not json"))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert_eq!(log.get(1), Some(Resolution::Nack { requeue: true }));
    assert!(h.server.received_requests().await.unwrap().is_empty());
    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_job_fetch_failure_is_requeued() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/jobs/abc"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let log = ResolutionLog::new();
    let disposition = h
        .processor(octree_only())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert_eq!(log.get(1), Some(Resolution::Nack { requeue: true }));
}

#[tokio::test]
async fn test_download_deadline_is_requeued_and_cleaned_up() {
    let mut h = Harness::new().await;
    h.settings.download_timeout = Duration::from_millis(200);
    h.mount_job(job_json(None, false)).await;
    Mock::given(method("GET"))
        .and(path("/s/abc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"world": {"path": "x"}})),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 16])
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&h.server)
        .await;
    h.mount_upload(204, 0).await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert_eq!(log.get(1), Some(Resolution::Nack { requeue: true }));
    assert!(engine.calls().is_empty());
    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_region_download_failure_is_requeued() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, false)).await;
    Mock::given(method("GET"))
        .and(path("/s/abc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"world": {"path": "x"}})),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f/1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert!(engine.calls().is_empty());
    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_scene_without_world_is_requeued() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, false)).await;
    Mock::given(method("GET"))
        .and(path("/s/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "x"})))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f/1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
        .mount(&h.server)
        .await;

    let log = ResolutionLog::new();
    let disposition = h
        .processor(octree_only())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
}

#[tokio::test]
async fn test_render_failure_is_requeued() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, false)).await;
    h.mount_inputs().await;
    h.mount_upload(204, 0).await;

    let log = ResolutionLog::new();
    let disposition = h
        .processor(Arc::new(StubRenderEngine::failing("out of memory")))
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert_eq!(log.get(1), Some(Resolution::Nack { requeue: true }));
    assert_eq!(h.job_dir_entries(), 0);
}

#[tokio::test]
async fn test_upload_failure_is_requeued() {
    let h = Harness::new().await;
    h.mount_job(job_json(None, false)).await;
    h.mount_inputs().await;
    h.mount_upload(500, 1).await;

    let log = ResolutionLog::new();
    let disposition = h
        .processor(octree_only())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert_eq!(log.get(1), Some(Resolution::Nack { requeue: true }));
}

#[tokio::test]
async fn test_closed_channel_skips_nack() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/jobs/abc"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let log = ResolutionLog::new();
    let closed = Arc::new(AtomicBool::new(false));
    let delivery = MemoryDelivery::new(1, br#"{"jobId":"abc"}"#.to_vec(), &log)
        .with_channel_flag(closed)
        .boxed();

    let disposition = h.processor(octree_only()).process(delivery).await;

    assert_eq!(disposition, Disposition::NackSkipped);
    assert!(log.entries().is_empty());
    assert_eq!(h.job_dir_entries(), 0);
}

// =============================================================================
// Texture packs
// =============================================================================

#[tokio::test]
async fn test_cached_texture_pack_is_not_downloaded() {
    let h = Harness::new().await;
    std::fs::create_dir_all(h.texture_dir()).unwrap();
    std::fs::write(h.texture_dir().join("faithful.zip"), b"PK").unwrap();

    h.mount_job(job_json(Some("faithful"), false)).await;
    h.mount_inputs().await;
    h.mount_upload(204, 1).await;
    Mock::given(method("GET"))
        .and(path("/texturepacks/faithful"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(
        engine.calls()[0].texture_pack.as_deref(),
        Some(h.texture_dir().join("faithful.zip").as_path())
    );
}

#[tokio::test]
async fn test_missing_texture_pack_is_downloaded_before_render() {
    let h = Harness::new().await;
    h.mount_job(job_json(Some("faithful"), false)).await;
    h.mount_inputs().await;
    h.mount_upload(204, 1).await;
    Mock::given(method("GET"))
        .and(path("/texturepacks/faithful"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
        .expect(1)
        .mount(&h.server)
        .await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Acked);
    let pack: &Path = &h.texture_dir().join("faithful.zip");
    assert_eq!(std::fs::read(pack).unwrap(), b"PK\x03\x04");
    assert_eq!(engine.calls()[0].texture_pack.as_deref(), Some(pack));
}

#[tokio::test]
async fn test_texture_pack_failure_is_requeued() {
    let h = Harness::new().await;
    h.mount_job(job_json(Some("faithful"), false)).await;
    h.mount_inputs().await;
    Mock::given(method("GET"))
        .and(path("/texturepacks/faithful"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let engine = octree_only();
    let log = ResolutionLog::new();
    let disposition = h
        .processor(engine.clone())
        .process(delivery(&log, r#"{"jobId":"abc"}"#))
        .await;

    assert_eq!(disposition, Disposition::Requeued);
    assert!(engine.calls().is_empty());
    assert!(!h.texture_dir().join("faithful.zip").exists());
}
