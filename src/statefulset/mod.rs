//! Deploys the etcd StatefulSet and waits for it to become ready or to disappear.

use std::future::Future;

use k8s_openapi::api::apps::v1::StatefulSet;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

pub mod check;
pub mod client;
pub mod compose;
pub mod provider;
pub mod values;

pub use check::{check_statefulset, RolloutInProgress};
pub use client::{KubeStatefulSetClient, StatefulSetClient};
pub use values::Values;

use crate::errors::{is_not_found, Error};
use crate::merge_patch;
use crate::metrics::{kube_error_happened, wait_finished};
use crate::retry::{self, minor, severe, WaitConfig};
use client::EVENT_TYPE_WARNING;
use compose::{compose, empty_statefulset};

/// Most recent warning events shown per pending PVC.
const PVC_EVENTS_LIMIT: usize = 2;

pub struct StatefulSetDeployer<C> {
    client: C,
    values: Values,
    wait_config: WaitConfig,
    cancel: CancellationToken,
}

impl<C: StatefulSetClient> StatefulSetDeployer<C> {
    pub fn new(client: C, values: Values) -> Self {
        StatefulSetDeployer {
            client,
            values,
            wait_config: WaitConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_wait_config(mut self, wait_config: WaitConfig) -> Self {
        self.wait_config = wait_config;
        self
    }

    /// Token observed by every platform call and every poll interval.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the current StatefulSet.
    pub async fn get(&self) -> Result<StatefulSet, Error> {
        let sts = self
            .guard(self.client.get(&self.values.namespace, &self.values.name))
            .await?
            .map_err(|err| self.kube_error("get", err))?;
        Ok(sts)
    }

    /// Create or patch the StatefulSet. A single-member StatefulSet that is being scaled out is
    /// deleted and created again, since its service name can not be patched.
    pub async fn deploy(&self) -> Result<(), Error> {
        let mut sts = match self.get().await {
            Ok(sts) => sts,
            Err(err) if err.is_not_found() => empty_statefulset(&self.values),
            Err(err) => return Err(err),
        };

        if sts.metadata.generation.unwrap_or_default() > 1 && self.scaled_up_to_multi_node() {
            info!(
                "StatefulSet {} is scaled up from a single member to {} replicas, recreating it",
                self.object_key(),
                self.values.replicas
            );
            self.destroy().await?;
            self.wait_cleanup().await?;
            sts = empty_statefulset(&self.values);
        }

        self.sync_statefulset(sts).await
    }

    /// Delete the StatefulSet. An already absent StatefulSet counts as deleted.
    pub async fn destroy(&self) -> Result<(), Error> {
        let result = self
            .guard(self.client.delete(&self.values.namespace, &self.values.name))
            .await?;
        match result {
            Ok(()) => {
                info!("Deleted StatefulSet {}", self.object_key());
                Ok(())
            }
            Err(err) if is_not_found(&err) => {
                debug!("StatefulSet {} already gone", self.object_key());
                Ok(())
            }
            Err(err) => Err(self.kube_error("delete", err)),
        }
    }

    /// Wait until the StatefulSet has rolled out with all replicas ready. On failure the error is
    /// extended with warning events of PVCs that are not bound yet.
    pub async fn wait(&self) -> Result<(), Error> {
        let replicas = self.values.replicas;
        let result = retry::until_timeout(&self.cancel, self.wait_config, || async move {
            let sts = match self.get().await {
                Ok(sts) => sts,
                Err(err) if err.is_not_found() => return Err(minor(err)),
                Err(err) => return Err(severe(err)),
            };
            check_statefulset(replicas, &sts).map_err(minor)
        })
        .await;

        let err = match result {
            Ok(()) => {
                wait_finished("wait", "ready");
                info!("StatefulSet {} is ready", self.object_key());
                return Ok(());
            }
            Err(err) => err,
        };
        wait_finished("wait", outcome(&err));
        if matches!(err, Error::Cancelled) {
            return Err(err);
        }

        match self.fetch_pvc_events().await {
            Ok(events) if !events.is_empty() => Err(Error::WithEvents {
                source: Box::new(err),
                events,
            }),
            Ok(_) => Err(err),
            Err(events_err) => {
                // Best effort only, the wait error is what the caller needs to see.
                error!(
                    "Error while fetching events for depending PVC of {}: {}",
                    self.object_key(),
                    events_err
                );
                Err(err)
            }
        }
    }

    /// Wait until the StatefulSet is gone.
    pub async fn wait_cleanup(&self) -> Result<(), Error> {
        let result = retry::until_timeout(&self.cancel, self.wait_config, || async move {
            match self.get().await {
                Ok(_) => Err(minor(Error::StillExists(self.object_key()))),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(severe(err)),
            }
        })
        .await;

        match &result {
            Ok(()) => wait_finished("wait_cleanup", "deleted"),
            Err(err) => wait_finished("wait_cleanup", outcome(err)),
        }
        result
    }

    fn scaled_up_to_multi_node(&self) -> bool {
        // `0` is included because the status replicas were not maintained by earlier releases.
        self.values.replicas > 1 && (self.values.status_replicas == 0 || self.values.status_replicas == 1)
    }

    async fn sync_statefulset(&self, mut sts: StatefulSet) -> Result<(), Error> {
        let original = sts.clone();
        compose(&self.values, &mut sts);

        if original.metadata.generation.unwrap_or_default() > 0 {
            let patch = merge_patch::create(&original, &sts)?;
            debug!("Patching StatefulSet {} with {}", self.object_key(), patch);
            self.guard(self.client.patch(&self.values.namespace, &self.values.name, &patch))
                .await?
                .map_err(|err| self.kube_error("patch", err))?;
            info!("Patched StatefulSet {}", self.object_key());
            return Ok(());
        }

        self.guard(self.client.create(&sts))
            .await?
            .map_err(|err| self.kube_error("create", err))?;
        info!("Created StatefulSet {}", self.object_key());
        Ok(())
    }

    async fn fetch_pvc_events(&self) -> Result<String, Error> {
        let pvcs = self
            .guard(self.client.list_pvcs(&self.values.namespace))
            .await?
            .map_err(|err| self.kube_error("list_pvcs", err))?;

        let prefix = self.values.volume_claim_prefix();
        let mut messages = String::new();
        for pvc in pvcs.iter().filter(|pvc| {
            let name = pvc.metadata.name.as_deref().unwrap_or_default();
            let phase = pvc.status.as_ref().and_then(|status| status.phase.as_deref());
            name.starts_with(&prefix) && phase != Some("Bound")
        }) {
            let events = self
                .guard(self.client.fetch_event_messages(pvc, EVENT_TYPE_WARNING, PVC_EVENTS_LIMIT))
                .await?
                .map_err(|err| self.kube_error("list_events", err))?;
            if !events.is_empty() {
                messages.push_str(&format!(
                    "Warning for PVC {}:\n{}\n",
                    pvc.metadata.name.as_deref().unwrap_or_default(),
                    events
                ));
            }
        }
        Ok(messages)
    }

    async fn guard<T>(&self, call: impl Future<Output = T>) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            output = call => Ok(output),
        }
    }

    fn kube_error(&self, action: &str, err: kube::Error) -> Error {
        if !is_not_found(&err) {
            warn!("Failed to {} StatefulSet {}: {}", action, self.object_key(), err);
        }
        kube_error_happened(action, &err);
        Error::KubeError(err)
    }

    fn object_key(&self) -> String {
        format!("{}/{}", self.values.namespace, self.values.name)
    }
}

fn outcome(err: &Error) -> &'static str {
    match err {
        Error::Timeout { .. } => "timeout",
        Error::Cancelled => "cancelled",
        _ => "failed",
    }
}
