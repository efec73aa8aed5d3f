//! Structured assignment logging.
//!
//! Every line carries the delivery tag, and the job id once the body
//! has been decoded, plus the phase the assignment is in.

use tracing::{error, info, warn, Span};

use rnode_models::JobId;

/// Phases of one assignment, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    FetchJob,
    Inputs,
    TexturePack,
    Render,
    Upload,
    Resolve,
    Cleanup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parse => "parse",
            Phase::FetchJob => "fetch_job",
            Phase::Inputs => "inputs",
            Phase::TexturePack => "texture_pack",
            Phase::Render => "render",
            Phase::Upload => "upload",
            Phase::Resolve => "resolve",
            Phase::Cleanup => "cleanup",
        }
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    delivery_tag: u64,
    job_id: Option<String>,
    phase: Phase,
}

impl JobLogger {
    pub fn new(delivery_tag: u64) -> Self {
        Self {
            delivery_tag,
            job_id: None,
            phase: Phase::Parse,
        }
    }

    /// Attach the decoded job id.
    pub fn set_job(&mut self, job_id: &JobId) {
        self.job_id = Some(job_id.to_string());
    }

    /// Move to the next phase.
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn log_start(&self, message: &str) {
        info!(
            delivery_tag = self.delivery_tag,
            job_id = self.job_id(),
            phase = self.phase.as_str(),
            "Assignment started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            delivery_tag = self.delivery_tag,
            job_id = self.job_id(),
            phase = self.phase.as_str(),
            "Assignment progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            delivery_tag = self.delivery_tag,
            job_id = self.job_id(),
            phase = self.phase.as_str(),
            "Assignment warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            delivery_tag = self.delivery_tag,
            job_id = self.job_id(),
            phase = self.phase.as_str(),
            "Assignment error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            delivery_tag = self.delivery_tag,
            job_id = self.job_id(),
            phase = self.phase.as_str(),
            "Assignment completed: {}", message
        );
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn job_id(&self) -> &str {
        self.job_id.as_deref().unwrap_or("-")
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Span wrapping the whole assignment.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("assignment", delivery_tag = self.delivery_tag)
    }
}
