//! Render engine double.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use rnode_models::SceneData;

use crate::engine::{RenderEngine, RenderRequest};
use crate::error::{RenderError, RenderResult};

enum Behaviour {
    Return(SceneData),
    Fail(String),
}

/// Engine that returns canned scene data and records every request.
pub struct StubRenderEngine {
    behaviour: Behaviour,
    delay: Option<Duration>,
    calls: Mutex<Vec<RenderRequest>>,
}

impl StubRenderEngine {
    pub fn returning(data: SceneData) -> Self {
        Self {
            behaviour: Behaviour::Return(data),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            behaviour: Behaviour::Fail(message.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RenderRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RenderEngine for StubRenderEngine {
    async fn generate_scene_data(&self, request: &RenderRequest) -> RenderResult<SceneData> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            Behaviour::Return(data) => Ok(data.clone()),
            Behaviour::Fail(message) => {
                Err(RenderError::engine_failed(message.clone(), None, None))
            }
        }
    }
}
