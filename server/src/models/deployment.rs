//! Deployment models

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

/// Tag used when a request does not name one
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Container count used when the environment does not configure one
pub const DEFAULT_NUM_CONTAINERS: i64 = 2;

/// A deploy request as it travels through the job queue.
///
/// The client supplies the image, tag and environment; the gateway assigns the
/// deploy ID and fills in the environment-resolved fields before enqueueing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Correlation key for the whole run
    #[serde(rename = "deployID", default)]
    pub deploy_id: String,

    /// Image name in the registry
    #[serde(default)]
    pub image_name: String,

    /// Image tag to deploy
    #[serde(default)]
    pub image_tag: String,

    /// Target environment name
    #[serde(default)]
    pub environment: String,

    /// Resolves the machine names in the environment
    #[serde(default)]
    pub env_tag: String,

    /// Coordination endpoint host and port, empty when the environment has none
    #[serde(default)]
    pub etcd_endpoint: String,

    /// Master machine for the cluster, or the single node
    #[serde(default)]
    pub machine: String,

    /// Remote directory that receives the metadata
    #[serde(default)]
    pub meta_mount: String,

    /// Default number of containers for this environment
    #[serde(default)]
    pub num_cont: i64,

    /// Docker registry for this environment
    #[serde(default)]
    pub registry: String,

    /// The target is a Swarm cluster
    #[serde(default)]
    pub swarm: bool,
}

impl DeployRequest {
    /// Encode for the job queue
    pub fn to_payload(&self) -> Result<String, ServerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a job queue payload
    pub fn from_payload(payload: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Compose service name derived from the image name
    pub fn service_name(&self) -> String {
        self.image_name.replace('-', "_")
    }
}

/// Status codes persisted with a deploy record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum DeployStatusCode {
    Queued = 1,
    Started = 2,
    Success = 3,
    Failed = 4,
}

impl DeployStatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Success and Failed end a run
    pub fn is_terminal(self) -> bool {
        matches!(self, DeployStatusCode::Success | DeployStatusCode::Failed)
    }
}

impl From<DeployStatusCode> for i32 {
    fn from(code: DeployStatusCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for DeployStatusCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeployStatusCode::Queued),
            2 => Ok(DeployStatusCode::Started),
            3 => Ok(DeployStatusCode::Success),
            4 => Ok(DeployStatusCode::Failed),
            other => Err(format!("Unknown deploy status code: {}", other)),
        }
    }
}

impl fmt::Display for DeployStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStatusCode::Queued => "queued",
            DeployStatusCode::Started => "started",
            DeployStatusCode::Success => "success",
            DeployStatusCode::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The persisted record of one deploy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatus {
    #[serde(rename = "deployID")]
    pub deploy_id: String,
    pub environment: String,
    pub image_name: String,
    pub image_tag: String,
    pub status: DeployStatusCode,
    /// Short message for the latest transition
    pub message: String,
    /// Every step so far, one entry per line
    pub log: String,
    pub updated_at: String,
    pub created_at: String,
}
