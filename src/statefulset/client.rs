//! Platform calls needed by the deployer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Event, PersistentVolumeClaim},
};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use log::debug;

#[cfg(test)]
use mockall::automock;

pub const EVENT_TYPE_WARNING: &str = "Warning";

/// StatefulSet, PersistentVolumeClaim and Event access.
///
/// Errors are the raw `kube::Error`s so callers can tell a 404 apart from everything else.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatefulSetClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<StatefulSet, kube::Error>;

    async fn create(&self, sts: &StatefulSet) -> Result<StatefulSet, kube::Error>;

    /// Apply a JSON merge patch.
    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<StatefulSet, kube::Error>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    async fn list_pvcs(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>, kube::Error>;

    /// The newest `limit` events of `event_type` for `pvc`, rendered for humans. Empty if there are none.
    async fn fetch_event_messages(
        &self,
        pvc: &PersistentVolumeClaim,
        event_type: &str,
        limit: usize,
    ) -> Result<String, kube::Error>;
}

pub struct KubeStatefulSetClient {
    client: Client,
}

impl KubeStatefulSetClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatefulSetClient for KubeStatefulSetClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<StatefulSet, kube::Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }

    async fn create(&self, sts: &StatefulSet) -> Result<StatefulSet, kube::Error> {
        let namespace = sts.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), sts).await
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<StatefulSet, kube::Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_pvcs(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>, kube::Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn fetch_event_messages(
        &self,
        pvc: &PersistentVolumeClaim,
        event_type: &str,
        limit: usize,
    ) -> Result<String, kube::Error> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or("default");
        let name = pvc.metadata.name.as_deref().unwrap_or_default();
        let selector = format!(
            "involvedObject.apiVersion=v1,involvedObject.kind=PersistentVolumeClaim,involvedObject.name={},involvedObject.namespace={},type={}",
            name, namespace, event_type
        );
        debug!("Listing events with field selector {}", selector);

        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let events = api.list(&ListParams::default().fields(&selector)).await?.items;
        Ok(build_events_message(events, limit, Utc::now()))
    }
}

/// Render the newest `limit` events, oldest first.
pub fn build_events_message(mut events: Vec<Event>, limit: usize, now: DateTime<Utc>) -> String {
    if events.is_empty() || limit == 0 {
        return String::new();
    }
    events.sort_by_key(last_seen);
    let skip = events.len().saturating_sub(limit);

    let mut message = String::from("-> Events:");
    for event in events.iter().skip(skip) {
        let component = event
            .source
            .as_ref()
            .and_then(|source| source.component.as_deref())
            .unwrap_or("unknown");
        let age = last_seen(event)
            .map(|seen| format!("{} ago", short_duration(now - seen)))
            .unwrap_or_else(|| "<unknown>".to_string());
        let interval = match event.count {
            Some(count) if count > 1 => format!("{} (x{})", age, count),
            _ => age,
        };
        message.push_str(&format!(
            "\n* {} reported {}: {}",
            component,
            interval,
            event.message.as_deref().unwrap_or_default()
        ));
    }
    message
}

fn last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|time| time.0)
        .or_else(|| event.event_time.as_ref().map(|time| time.0))
}

fn short_duration(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m{}s", s / 60, s % 60),
        s => format!("{}h{}m", s / 3600, (s % 3600) / 60),
    }
}
