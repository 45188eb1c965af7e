use thiserror::Error;

use crate::statefulset::RolloutInProgress;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kube API Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("retry failed with deadline exceeded, last error: {}", .last_error.as_deref().unwrap_or("none"))]
    Timeout { last_error: Option<String> },

    #[error("{0}")]
    Rollout(#[from] RolloutInProgress),

    #[error("StatefulSet {0} still exists")]
    StillExists(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{source}\n\n{events}")]
    WithEvents {
        #[source]
        source: Box<Error>,
        events: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid values file: {0}")]
    Values(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Config(String),
}

impl Error {
    /// True when the platform reported the object as absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(err) => is_not_found(err),
            _ => false,
        }
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[cfg(test)]
pub(crate) fn not_found() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "statefulsets.apps \"etcd-main\" not found".to_string(),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

#[cfg(test)]
pub(crate) fn server_error() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    })
}
