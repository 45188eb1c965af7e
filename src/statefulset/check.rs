use k8s_openapi::api::apps::v1::StatefulSet;
use thiserror::Error;

/// Why a StatefulSet is not ready yet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RolloutInProgress {
    #[error("observed generation outdated ({observed}/{generation})")]
    ObservedGenerationOutdated { observed: i64, generation: i64 },

    #[error("StatefulSet replicas ({actual}) do not match desired etcd replicas ({desired})")]
    ReplicasMismatch { actual: i32, desired: i32 },

    #[error("not enough ready replicas ({ready}/{desired})")]
    NotEnoughReadyReplicas { ready: i32, desired: i32 },

    #[error("StatefulSet has not updated all replicas to revision {update_revision}")]
    RevisionOutdated { update_revision: String },
}

/// Check that `sts` has rolled out completely with `replicas` ready members.
pub fn check_statefulset(replicas: i32, sts: &StatefulSet) -> Result<(), RolloutInProgress> {
    let status = sts.status.clone().unwrap_or_default();

    let generation = sts.metadata.generation.unwrap_or_default();
    let observed = status.observed_generation.unwrap_or_default();
    if observed < generation {
        return Err(RolloutInProgress::ObservedGenerationOutdated { observed, generation });
    }

    let actual = sts.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
    if actual != replicas {
        return Err(RolloutInProgress::ReplicasMismatch {
            actual,
            desired: replicas,
        });
    }

    let ready = status.ready_replicas.unwrap_or_default();
    if ready != actual {
        return Err(RolloutInProgress::NotEnoughReadyReplicas { ready, desired: actual });
    }

    if status.current_revision != status.update_revision {
        return Err(RolloutInProgress::RevisionOutdated {
            update_revision: status.update_revision.unwrap_or_default(),
        });
    }

    Ok(())
}
