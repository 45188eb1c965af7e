#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use etcd_statefulset::retry::WaitConfig;
use etcd_statefulset::{StatefulSetClient, Values};
use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::PersistentVolumeClaim};

/// Every call the deployer made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get,
    Create,
    Patch(serde_json::Value),
    Delete,
    ListPvcs,
    Events(String),
}

/// Client answering `get` and `delete` from scripts, recording every call.
#[derive(Default)]
pub struct ScriptedClient {
    gets: Mutex<VecDeque<Result<StatefulSet, kube::Error>>>,
    deletes: Mutex<VecDeque<Result<(), kube::Error>>>,
    pvcs: Vec<PersistentVolumeClaim>,
    events: Vec<(String, String)>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers for `get`, in order. The last answer repeats once the script is used up; an
    /// empty script means the StatefulSet does not exist.
    pub fn with_gets(self, gets: Vec<Result<StatefulSet, kube::Error>>) -> Self {
        *self.gets.lock().unwrap() = gets.into();
        self
    }

    pub fn with_deletes(self, deletes: Vec<Result<(), kube::Error>>) -> Self {
        *self.deletes.lock().unwrap() = deletes.into();
        self
    }

    pub fn with_pvcs(mut self, pvcs: Vec<PersistentVolumeClaim>) -> Self {
        self.pvcs = pvcs;
        self
    }

    pub fn with_events(mut self, pvc: &str, messages: &str) -> Self {
        self.events.push((pvc.to_string(), messages.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StatefulSetClient for ScriptedClient {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<StatefulSet, kube::Error> {
        self.record(Call::Get);
        let mut gets = self.gets.lock().unwrap();
        if gets.len() > 1 {
            return gets.pop_front().unwrap();
        }
        match gets.front() {
            Some(Ok(sts)) => Ok(sts.clone()),
            Some(Err(err)) => Err(repeat_error(err)),
            None => Err(not_found()),
        }
    }

    async fn create(&self, sts: &StatefulSet) -> Result<StatefulSet, kube::Error> {
        self.record(Call::Create);
        Ok(sts.clone())
    }

    async fn patch(&self, _namespace: &str, _name: &str, patch: &serde_json::Value) -> Result<StatefulSet, kube::Error> {
        self.record(Call::Patch(patch.clone()));
        Ok(StatefulSet::default())
    }

    async fn delete(&self, _namespace: &str, _name: &str) -> Result<(), kube::Error> {
        self.record(Call::Delete);
        self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn list_pvcs(&self, _namespace: &str) -> Result<Vec<PersistentVolumeClaim>, kube::Error> {
        self.record(Call::ListPvcs);
        Ok(self.pvcs.clone())
    }

    async fn fetch_event_messages(
        &self,
        pvc: &PersistentVolumeClaim,
        _event_type: &str,
        _limit: usize,
    ) -> Result<String, kube::Error> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.record(Call::Events(name.clone()));
        Ok(self
            .events
            .iter()
            .find(|(pvc, _)| pvc == &name)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default())
    }
}

// `kube::Error` is not `Clone`, only API errors can be answered more than once.
fn repeat_error(err: &kube::Error) -> kube::Error {
    match err {
        kube::Error::Api(response) => kube::Error::Api(response.clone()),
        other => panic!("can not repeat scripted error {:?}", other),
    }
}

pub fn not_found() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "statefulsets.apps \"myetcd\" not found".to_string(),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

pub fn server_error() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    })
}

pub fn fast_wait() -> WaitConfig {
    WaitConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(200),
    }
}

// Get the repo's example values file
pub fn example_values(name: &str) -> Values {
    let path = std::path::PathBuf::from(format!("{}/tests/{}", env!("CARGO_MANIFEST_DIR"), name));
    Values::from_file(&path).expect("Unable to parse values file")
}

pub fn existing(generation: i64) -> StatefulSet {
    let mut sts = StatefulSet::default();
    sts.metadata.name = Some("myetcd".to_string());
    sts.metadata.namespace = Some("shoot--dev--foo".to_string());
    sts.metadata.generation = Some(generation);
    sts.metadata.resource_version = Some("8812".to_string());
    sts
}

pub fn pvc(name: &str, phase: &str) -> PersistentVolumeClaim {
    let mut pvc = PersistentVolumeClaim::default();
    pvc.metadata.name = Some(name.to_string());
    pvc.status = Some(k8s_openapi::api::core::v1::PersistentVolumeClaimStatus {
        phase: Some(phase.to_string()),
        ..Default::default()
    });
    pvc
}
