//! External render engine command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use rnode_models::SceneData;

use crate::engine::{RenderEngine, RenderRequest, EMITTERGRID_FILE_NAME, OCTREE_FILE_NAME};
use crate::error::{RenderError, RenderResult};

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Render engine process configuration.
#[derive(Debug, Clone)]
pub struct RenderEngineConfig {
    /// Executable to run
    pub program: String,
    /// Arguments placed before the generated ones (e.g. `-jar chunky.jar`)
    pub base_args: Vec<String>,
    /// Texture pack used as fallback on every render
    pub default_texture_pack: Option<PathBuf>,
    /// Kill the engine after this long
    pub timeout: Option<Duration>,
}

impl Default for RenderEngineConfig {
    fn default() -> Self {
        Self {
            program: "chunky-octree".to_string(),
            base_args: Vec::new(),
            default_texture_pack: None,
            timeout: None,
        }
    }
}

impl RenderEngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut command = std::env::var("RS_RENDER_COMMAND")
            .unwrap_or_else(|_| "chunky-octree".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect::<VecDeque<_>>();

        Self {
            program: command
                .pop_front()
                .unwrap_or_else(|| "chunky-octree".to_string()),
            base_args: command.into(),
            default_texture_pack: std::env::var("RS_DEFAULT_TEXTUREPACK")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            timeout: std::env::var("RS_RENDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Builder for one engine invocation.
#[derive(Debug, Clone)]
pub struct RenderCommand {
    scene: PathBuf,
    world: PathBuf,
    dimension: i32,
    texture_packs: Vec<PathBuf>,
    output: PathBuf,
}

impl RenderCommand {
    pub fn new(scene: impl AsRef<Path>, world: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            scene: scene.as_ref().to_path_buf(),
            world: world.as_ref().to_path_buf(),
            dimension: 0,
            texture_packs: Vec::new(),
            output: output.as_ref().to_path_buf(),
        }
    }

    /// Set the dimension.
    pub fn dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }

    /// Add a texture pack. Earlier packs take precedence.
    pub fn texture_pack(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if !self.texture_packs.contains(&path) {
            self.texture_packs.push(path);
        }
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "--scene".to_string(),
            self.scene.to_string_lossy().to_string(),
            "--world".to_string(),
            self.world.to_string_lossy().to_string(),
            "--dimension".to_string(),
            self.dimension.to_string(),
        ];

        for pack in &self.texture_packs {
            args.push("--texture-pack".to_string());
            args.push(pack.to_string_lossy().to_string());
        }

        args.push("--output".to_string());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Production engine: runs an external octree generator per request.
#[derive(Debug, Clone)]
pub struct ProcessRenderEngine {
    config: RenderEngineConfig,
}

impl ProcessRenderEngine {
    pub fn new(config: RenderEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderEngineConfig {
        &self.config
    }

    /// Translate a request into an engine command line.
    pub fn command_for(&self, request: &RenderRequest) -> RenderResult<RenderCommand> {
        let output = request.output_directory()?;
        let mut command =
            RenderCommand::new(&request.scene_description, &request.world_directory, output)
                .dimension(request.dimension);

        if let Some(pack) = &request.texture_pack {
            command = command.texture_pack(pack);
        }
        if let Some(default_pack) = &self.config.default_texture_pack {
            command = command.texture_pack(default_pack);
        }

        Ok(command)
    }

    /// Check the engine executable exists.
    pub fn check_available(&self) -> RenderResult<PathBuf> {
        which::which(&self.config.program)
            .map_err(|_| RenderError::EngineNotFound(self.config.program.clone()))
    }

    async fn run(&self, command: &RenderCommand) -> RenderResult<()> {
        let program = self.check_available()?;

        let mut args = self.config.base_args.clone();
        args.extend(command.build_args());
        debug!("Running render engine: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RenderError::engine_failed("stderr not captured", None, None))?;

        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = reader.next_line().await {
                debug!(target: "rnode_render::engine", "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        match result {
            Err(RenderError::EngineFailed {
                message, exit_code, ..
            }) => Err(RenderError::engine_failed(
                message,
                Some(stderr_tail).filter(|s| !s.is_empty()),
                exit_code,
            )),
            other => other,
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> RenderResult<()> {
        let status = match self.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "Render engine timed out after {} seconds, killing process",
                        timeout.as_secs()
                    );
                    let _ = child.kill().await;
                    return Err(RenderError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(RenderError::engine_failed(
                "render engine exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

#[async_trait]
impl RenderEngine for ProcessRenderEngine {
    async fn generate_scene_data(&self, request: &RenderRequest) -> RenderResult<SceneData> {
        let command = self.command_for(request)?;
        let output = request.output_directory()?.to_path_buf();

        self.run(&command).await?;

        let octree_path = output.join(OCTREE_FILE_NAME);
        let octree = match tokio::fs::read(&octree_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::MissingOutput(octree_path));
            }
            Err(e) => return Err(e.into()),
        };

        let emitter_grid = match tokio::fs::read(output.join(EMITTERGRID_FILE_NAME)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        info!(
            octree_bytes = octree.len(),
            emitter_grid_bytes = emitter_grid.as_ref().map_or(0, Vec::len),
            "Render engine produced scene data"
        );

        Ok(SceneData::new(octree, emitter_grid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let args = RenderCommand::new("/w/scene.json", "/w", "/w")
            .dimension(0)
            .texture_pack("/packs/a.zip")
            .build_args();

        assert_eq!(
            args,
            vec![
                "--scene",
                "/w/scene.json",
                "--world",
                "/w",
                "--dimension",
                "0",
                "--texture-pack",
                "/packs/a.zip",
                "--output",
                "/w",
            ]
        );
    }

    #[test]
    fn test_default_texture_pack_follows_selected() {
        let engine = ProcessRenderEngine::new(RenderEngineConfig {
            default_texture_pack: Some(PathBuf::from("/packs/default.zip")),
            ..Default::default()
        });
        let request = RenderRequest::new("/w/scene.json", "/w")
            .with_texture_pack(Some(PathBuf::from("/packs/faithful.zip")));

        let args = engine.command_for(&request).unwrap().build_args();
        let packs: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "--texture-pack")
            .map(|w| w[1].clone())
            .collect();
        assert_eq!(packs, vec!["/packs/faithful.zip", "/packs/default.zip"]);
    }

    #[test]
    fn test_default_texture_pack_not_repeated() {
        let engine = ProcessRenderEngine::new(RenderEngineConfig {
            default_texture_pack: Some(PathBuf::from("/packs/default.zip")),
            ..Default::default()
        });
        let request = RenderRequest::new("/w/scene.json", "/w")
            .with_texture_pack(Some(PathBuf::from("/packs/default.zip")));

        let args = engine.command_for(&request).unwrap().build_args();
        assert_eq!(args.iter().filter(|a| *a == "--texture-pack").count(), 1);
    }

    #[tokio::test]
    async fn test_missing_engine() {
        let engine = ProcessRenderEngine::new(RenderEngineConfig {
            program: "rnode-definitely-not-installed".to_string(),
            ..Default::default()
        });
        let request = RenderRequest::new("/w/scene.json", "/w");

        let err = engine.generate_scene_data(&request).await.unwrap_err();
        assert!(matches!(err, RenderError::EngineNotFound(_)));
    }

    #[cfg(unix)]
    fn sh_engine(script: &str) -> ProcessRenderEngine {
        ProcessRenderEngine::new(RenderEngineConfig {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), script.to_string(), "engine".to_string()],
            default_texture_pack: None,
            timeout: Some(Duration::from_secs(10)),
        })
    }

    #[cfg(unix)]
    const WRITE_OUTPUTS: &str = r#"
        while [ $# -gt 0 ]; do
            case "$1" in --output) out="$2"; shift ;; esac
            shift
        done
        printf 'OCTREE' > "$out/scene.octree2"
        if [ -n "$WITH_GRID" ]; then printf 'GRID' > "$out/scene.emittergrid"; fi
    "#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_reads_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let script = format!("WITH_GRID=1\n{}", WRITE_OUTPUTS);
        let engine = sh_engine(&script);
        let request = RenderRequest::new(tmp.path().join("scene.json"), tmp.path());

        let data = engine.generate_scene_data(&request).await.unwrap();
        assert_eq!(data.octree, b"OCTREE");
        assert_eq!(data.emitter_grid.as_deref(), Some(&b"GRID"[..]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_without_emitter_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = sh_engine(WRITE_OUTPUTS);
        let request = RenderRequest::new(tmp.path().join("scene.json"), tmp.path());

        let data = engine.generate_scene_data(&request).await.unwrap();
        assert_eq!(data.octree, b"OCTREE");
        assert!(data.emitter_grid.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_failure_keeps_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = sh_engine("echo 'chunk load failed' >&2; exit 3");
        let request = RenderRequest::new(tmp.path().join("scene.json"), tmp.path());

        match engine.generate_scene_data(&request).await.unwrap_err() {
            RenderError::EngineFailed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.as_deref(), Some("chunk load failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_missing_octree() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = sh_engine("exit 0");
        let request = RenderRequest::new(tmp.path().join("scene.json"), tmp.path());

        let err = engine.generate_scene_data(&request).await.unwrap_err();
        assert!(matches!(err, RenderError::MissingOutput(_)));
    }
}
