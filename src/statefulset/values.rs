use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::{
    api::core::v1::{Affinity, ResourceRequirements, SecretReference, TopologySpreadConstraint},
    apimachinery::pkg::api::resource::Quantity,
};
use serde::Deserialize;

use crate::errors::Error;

/// Everything the etcd StatefulSet is built from. Produced by the owner of the `Etcd`
/// resource once per reconciliation.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Values {
    pub name: String,
    pub namespace: String,
    /// UID of the owning `Etcd` resource.
    pub etcd_uid: String,

    pub replicas: i32,
    /// Replicas last recorded in the `Etcd` status. `0` for clusters created before the field was maintained.
    pub status_replicas: i32,
    pub service_name: String,

    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,

    pub etcd_image: String,
    pub backup_image: String,
    pub etcd_command: Vec<String>,
    pub readiness_probe_command: Vec<String>,
    pub liveness_probe_command: Vec<String>,
    pub etcd_backup_command: Vec<String>,

    pub server_port: Option<i32>,
    pub client_port: Option<i32>,
    pub backup_port: Option<i32>,

    pub etcd_resources: Option<ResourceRequirements>,
    pub backup_resources: Option<ResourceRequirements>,

    pub volume_claim_template_name: String,
    pub storage_class: Option<String>,
    pub storage_capacity: Option<Quantity>,
    pub config_map_name: String,

    pub backup_store: Option<StoreValues>,
    pub backup_tls: Option<TlsConfig>,
    pub client_url_tls: Option<TlsConfig>,
    pub peer_url_tls: Option<TlsConfig>,

    pub priority_class_name: Option<String>,
    pub service_account_name: Option<String>,
    pub affinity: Option<Affinity>,
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,
}

/// Backup bucket description.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreValues {
    /// Infrastructure or storage provider name, e.g. `aws` or `S3`.
    pub provider: Option<String>,
    pub container: Option<String>,
    pub secret_ref: Option<SecretReference>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    #[serde(rename = "tlsCASecretRef")]
    pub tls_ca_secret_ref: SecretReference,
    pub server_tls_secret_ref: SecretReference,
    pub client_tls_secret_ref: SecretReference,
}

impl Values {
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Name prefix shared by every PVC created from the volume claim template.
    pub fn volume_claim_prefix(&self) -> String {
        format!("{}-{}", self.volume_claim_template_name, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_from_yaml() {
        let values = Values::from_yaml(
            r#"
name: etcd-main
namespace: shoot--dev--foo
replicas: 3
statusReplicas: 1
volumeClaimTemplateName: data
storageCapacity: 25Gi
backupStore:
  provider: aws
  container: etcd-backups
  secretRef:
    name: etcd-backup
clientUrlTls:
  tlsCASecretRef:
    name: ca-etcd
  serverTlsSecretRef:
    name: etcd-server
  clientTlsSecretRef:
    name: etcd-client
"#,
        )
        .expect("valid values");

        assert_eq!(values.replicas, 3);
        assert_eq!(values.status_replicas, 1);
        assert_eq!(values.storage_capacity, Some(Quantity("25Gi".to_string())));
        let store = values.backup_store.as_ref().unwrap();
        assert_eq!(store.provider.as_deref(), Some("aws"));
        assert_eq!(store.secret_ref.as_ref().unwrap().name.as_deref(), Some("etcd-backup"));
        let tls = values.client_url_tls.as_ref().unwrap();
        assert_eq!(tls.tls_ca_secret_ref.name.as_deref(), Some("ca-etcd"));
        assert!(values.peer_url_tls.is_none());
        assert_eq!(values.volume_claim_prefix(), "data-etcd-main");
    }

    #[test]
    fn test_values_from_invalid_yaml() {
        assert!(matches!(Values::from_yaml("replicas: [1"), Err(Error::Values(_))));
    }
}
