//! Job definitions shared between the queue and the coordinator API.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a coordinator job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of one queue delivery.
///
/// Unknown fields are ignored so the coordinator can extend the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub job_id: JobId,
}

impl Assignment {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: JobId::from_string(job_id),
        }
    }

    /// Decode a delivery body (UTF-8 JSON).
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

/// A region file the job needs, relative to the coordinator base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFile {
    /// File name inside the world's `region/` directory (e.g. `r.0.0.mca`)
    pub name: String,
    /// Download path
    pub url: String,
}

/// The coordinator's record of a render job.
///
/// Fetched fresh for every assignment; the authoritative copy lives on the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,

    /// Region files to place under `region/`, in listed order
    #[serde(default)]
    pub region_file_urls: Vec<RegionFile>,

    /// Path of the scene description document
    pub scene_url: String,

    /// Texture pack identifier, if the job uses one
    #[serde(rename = "texturePack", default)]
    pub texture_pack_id: Option<String>,

    #[serde(default)]
    pub cancelled: bool,
}

impl Job {
    pub fn region_count(&self) -> usize {
        self.region_file_urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_from_body() {
        let assignment = Assignment::from_slice(br#"{"jobId":"abc","priority":3}"#).unwrap();
        assert_eq!(assignment.job_id.as_str(), "abc");
    }

    #[test]
    fn test_assignment_requires_job_id() {
        assert!(Assignment::from_slice(br#"{"id":"abc"}"#).is_err());
        assert!(Assignment::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_job_deserialize() {
        let job: Job = serde_json::from_str(
            r#"{
                "id": "abc",
                "cancelled": false,
                "texturePack": null,
                "regionFileUrls": [{"name": "r.0.0.mca", "url": "/f/1"}],
                "sceneUrl": "/s/abc"
            }"#,
        )
        .unwrap();

        assert_eq!(job.id, JobId::from_string("abc"));
        assert_eq!(job.region_count(), 1);
        assert_eq!(job.region_file_urls[0].name, "r.0.0.mca");
        assert_eq!(job.scene_url, "/s/abc");
        assert!(job.texture_pack_id.is_none());
        assert!(!job.cancelled);
    }

    #[test]
    fn test_job_defaults() {
        let job: Job =
            serde_json::from_str(r#"{"id":"j","sceneUrl":"/s/j","texturePack":"faithful"}"#)
                .unwrap();
        assert!(job.region_file_urls.is_empty());
        assert!(!job.cancelled);
        assert_eq!(job.texture_pack_id.as_deref(), Some("faithful"));
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::from_string("job-1");
        assert_eq!(id.to_string(), "job-1");
        assert_ne!(JobId::new(), JobId::new());
    }
}
