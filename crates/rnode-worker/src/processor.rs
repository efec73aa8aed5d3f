//! Assignment processing.
//!
//! One delivery goes through parse, job fetch, input download, texture
//! pack resolution, render and upload. Every delivery ends in exactly one
//! ack or nack, and its working directory is removed before that happens.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{try_join, try_join_all};
use tracing::{debug, Instrument};

use rnode_api::ApiClient;
use rnode_models::{Assignment, Job};
use rnode_queue::BoxedDelivery;
use rnode_render::{RenderEngine, RenderRequest, OVERWORLD};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{JobLogger, Phase};
use crate::metrics;
use crate::supervisor::AssignmentHandler;
use crate::texture_cache::TexturePackCache;
use crate::workspace::WorkingDirectory;

/// Scene name written into every persisted scene description.
const SCENE_NAME: &str = "scene";

/// How an assignment should be resolved on the broker.
#[derive(Debug)]
pub enum Outcome {
    /// Done, or nothing to do (job deleted or cancelled).
    Ack,
    /// Failed; put the delivery back on the queue.
    Requeue(WorkerError),
}

/// What actually happened to the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    /// The channel was gone; nothing could be sent.
    NackSkipped,
    /// The broker call itself failed.
    ResolveFailed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Acked => "ack",
            Disposition::Requeued => "requeue",
            Disposition::NackSkipped => "skipped_nack",
            Disposition::ResolveFailed => "resolve_failed",
        }
    }
}

/// Successful end states of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Rendered,
    Deleted,
    Cancelled,
}

/// Deadlines applied by the processor.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub job_dir: PathBuf,
    pub job_fetch_timeout: Duration,
    pub download_timeout: Duration,
    pub texture_pack_timeout: Duration,
}

impl From<&WorkerConfig> for ProcessorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            job_dir: config.job_dir.clone(),
            job_fetch_timeout: config.job_fetch_timeout,
            download_timeout: config.download_timeout,
            texture_pack_timeout: config.texture_pack_timeout,
        }
    }
}

/// Turns deliveries into rendered scene data on the coordinator.
#[derive(Clone)]
pub struct AssignmentProcessor {
    api: ApiClient,
    engine: Arc<dyn RenderEngine>,
    texture_packs: TexturePackCache,
    settings: ProcessorSettings,
}

impl AssignmentProcessor {
    pub fn new(
        api: ApiClient,
        engine: Arc<dyn RenderEngine>,
        texture_packs: TexturePackCache,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            api,
            engine,
            texture_packs,
            settings,
        }
    }

    /// Fully resolve one delivery.
    pub async fn process(&self, delivery: BoxedDelivery) -> Disposition {
        let mut logger = JobLogger::new(delivery.delivery_tag());
        let span = logger.create_span();

        async move {
            if delivery.redelivered() {
                logger.log_progress("delivery was redelivered by the broker");
            }

            let outcome = match WorkingDirectory::create(&self.settings.job_dir).await {
                Ok(workdir) => {
                    let outcome = match self.run(delivery.body(), &workdir, &mut logger).await {
                        Ok(completion) => {
                            debug!(?completion, "Pipeline finished");
                            Outcome::Ack
                        }
                        Err(e) => Outcome::Requeue(e),
                    };

                    logger.enter(Phase::Cleanup);
                    if let Err(e) = workdir.remove().await {
                        logger.log_warning(&format!("failed to remove working directory: {}", e));
                    }
                    outcome
                }
                Err(e) => Outcome::Requeue(WorkerError::Io(e)),
            };

            let disposition = self.resolve(delivery, outcome, &mut logger).await;
            metrics::record_assignment(disposition.as_str());

            self.api.response_cache().prune_async().await;
            disposition
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        body: &[u8],
        workdir: &WorkingDirectory,
        logger: &mut JobLogger,
    ) -> WorkerResult<Completion> {
        logger.enter(Phase::Parse);
        let assignment = Assignment::from_slice(body).map_err(WorkerError::Decode)?;
        logger.set_job(&assignment.job_id);
        logger.log_start("assignment received");

        // Cancellation is checked once, here, and never again.
        logger.enter(Phase::FetchJob);
        let job = tokio::time::timeout(
            self.settings.job_fetch_timeout,
            self.api.get_job(&assignment.job_id),
        )
        .await
        .map_err(|_| WorkerError::timeout("job fetch", self.settings.job_fetch_timeout))?
        .map_err(WorkerError::Fetch)?;

        let job = match job {
            Some(job) if job.cancelled => {
                logger.log_completion("job was cancelled, nothing to do");
                return Ok(Completion::Cancelled);
            }
            Some(job) => job,
            None => {
                logger.log_completion("job was deleted, nothing to do");
                return Ok(Completion::Deleted);
            }
        };

        logger.enter(Phase::Inputs);
        logger.log_progress(&format!(
            "downloading scene and {} region file(s)",
            job.region_count()
        ));
        let started = Instant::now();
        let scene_path = tokio::time::timeout(
            self.settings.download_timeout,
            self.fetch_inputs(&job, workdir),
        )
        .await
        .map_err(|_| WorkerError::timeout("input download", self.settings.download_timeout))??;
        metrics::record_download_duration(started.elapsed().as_secs_f64());

        logger.enter(Phase::TexturePack);
        let texture_pack = match &job.texture_pack_id {
            Some(id) => Some(
                self.texture_packs
                    .ensure(&self.api, id, self.settings.texture_pack_timeout)
                    .await?,
            ),
            None => None,
        };

        logger.enter(Phase::Render);
        logger.log_progress("generating scene data");
        let request = RenderRequest::new(scene_path, workdir.path())
            .with_dimension(OVERWORLD)
            .with_texture_pack(texture_pack);
        let started = Instant::now();
        let scene_data = self.engine.generate_scene_data(&request).await?;
        metrics::record_render_duration(started.elapsed().as_secs_f64());

        logger.enter(Phase::Upload);
        logger.log_progress(&format!("uploading {} bytes of scene data", scene_data.len()));
        let started = Instant::now();
        self.api
            .upload_scene_data(&job.id, scene_data)
            .await
            .map_err(WorkerError::Upload)?;
        metrics::record_upload_duration(started.elapsed().as_secs_f64());

        logger.log_completion("scene data uploaded");
        Ok(Completion::Rendered)
    }

    /// Download the scene description and all region files concurrently.
    ///
    /// Returns the path of the persisted scene description.
    async fn fetch_inputs(&self, job: &Job, workdir: &WorkingDirectory) -> WorkerResult<PathBuf> {
        let scene = async {
            let mut scene = self
                .api
                .get_scene(job)
                .await
                .map_err(|e| WorkerError::download("scene description", e))?;
            prepare_scene(&mut scene)?;

            let path = workdir.scene_path();
            let bytes = serde_json::to_vec_pretty(&scene).map_err(|e| {
                WorkerError::invalid_input(format!("scene description not serializable: {}", e))
            })?;
            tokio::fs::write(&path, bytes).await?;
            Ok::<_, WorkerError>(path)
        };

        let regions = async {
            let region_dir = workdir.region_dir();
            tokio::fs::create_dir_all(&region_dir).await?;

            let downloads = job
                .region_file_urls
                .iter()
                .map(|region| {
                    let region_dir = region_dir.as_path();
                    async move {
                        let dest = region_path(region_dir, &region.name)?;
                        self.api
                            .download_file(&region.url, &dest)
                            .await
                            .map_err(|e| {
                                WorkerError::download(format!("region {}", region.name), e)
                            })
                    }
                })
                .collect::<Vec<_>>();

            Ok::<_, WorkerError>(try_join_all(downloads).await?)
        };

        let (scene_path, _regions) = try_join(scene, regions).await?;
        Ok(scene_path)
    }

    async fn resolve(
        &self,
        delivery: BoxedDelivery,
        outcome: Outcome,
        logger: &mut JobLogger,
    ) -> Disposition {
        logger.enter(Phase::Resolve);

        match outcome {
            Outcome::Ack => match delivery.ack().await {
                Ok(()) => Disposition::Acked,
                Err(e) => {
                    logger.log_error(&format!("failed to ack delivery: {}", e));
                    Disposition::ResolveFailed
                }
            },
            Outcome::Requeue(err) => {
                metrics::record_assignment_failure(err.kind().as_str());
                logger.log_error(&format!("assignment failed ({}): {}", err.kind().as_str(), err));

                if !delivery.channel_open() {
                    logger.log_warning("channel already closed, skipping nack");
                    return Disposition::NackSkipped;
                }

                match delivery.nack(true).await {
                    Ok(()) => Disposition::Requeued,
                    Err(e) if e.is_channel_closed() => {
                        logger.log_warning("channel closed during nack");
                        Disposition::NackSkipped
                    }
                    Err(e) => {
                        logger.log_error(&format!("failed to nack delivery: {}", e));
                        Disposition::ResolveFailed
                    }
                }
            }
        }
    }
}

#[async_trait]
impl AssignmentHandler for AssignmentProcessor {
    async fn handle(&self, delivery: BoxedDelivery) {
        self.process(delivery).await;
    }
}

/// Point the scene at the local world: fixed name, blank world path.
pub fn prepare_scene(scene: &mut serde_json::Value) -> WorkerResult<()> {
    let object = scene
        .as_object_mut()
        .ok_or_else(|| WorkerError::invalid_input("scene description is not a JSON object"))?;

    object.insert("name".to_string(), serde_json::Value::from(SCENE_NAME));

    let world = object
        .get_mut("world")
        .and_then(serde_json::Value::as_object_mut)
        .ok_or_else(|| WorkerError::invalid_input("scene description has no world object"))?;
    world.insert("path".to_string(), serde_json::Value::from(""));

    Ok(())
}

/// Destination for a region file, keeping only the listed file name.
fn region_path(region_dir: &Path, name: &str) -> WorkerResult<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .filter(|f| *f == OsStr::new(name))
        .ok_or_else(|| {
            WorkerError::invalid_input(format!(
                "region file name {:?} is not a plain file name",
                name
            ))
        })?;
    Ok(region_dir.join(file_name))
}
