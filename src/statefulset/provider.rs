//! Backup storage providers and what each of them needs inside the backup-restore container.

use k8s_openapi::api::core::v1::{EnvVar, HostPathVolumeSource, SecretVolumeSource, Volume, VolumeMount};

use super::values::StoreValues;
use crate::utils::{env_var, env_var_from_secret};

/// Host directory under which local backup buckets live.
pub const LOCAL_PREFIX: &str = "/etc/gardener/local-backupbuckets";

const HOST_STORAGE_VOLUME: &str = "host-storage";
const BACKUP_SECRET_VOLUME: &str = "etcd-backup";
const CREDENTIALS_MOUNT_PATH: &str = "/root/etcd-backup";
const GCS_MOUNT_PATH: &str = "/root/.gcp/";
const GCS_CREDENTIALS_FILE: &str = "/root/.gcp/serviceaccount.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageProvider {
    Local,
    S3,
    Abs,
    Gcs,
    Swift,
    Oss,
    Ecs,
    Ocs,
}

impl StorageProvider {
    /// Map an infrastructure or storage provider name to a storage provider.
    pub fn from_infra(provider: &str) -> Option<Self> {
        match provider {
            "aws" | "S3" => Some(StorageProvider::S3),
            "azure" | "ABS" => Some(StorageProvider::Abs),
            "gcp" | "GCS" => Some(StorageProvider::Gcs),
            "openstack" | "Swift" => Some(StorageProvider::Swift),
            "alicloud" | "OSS" => Some(StorageProvider::Oss),
            "dell" | "ECS" => Some(StorageProvider::Ecs),
            "openshift" | "OCS" => Some(StorageProvider::Ocs),
            "Local" | "local" => Some(StorageProvider::Local),
            _ => None,
        }
    }

    /// Variable pointing at the mounted credentials, for providers that read a credentials file.
    fn credentials_env(self) -> Option<(&'static str, &'static str)> {
        match self {
            StorageProvider::S3 => Some(("AWS_APPLICATION_CREDENTIALS", CREDENTIALS_MOUNT_PATH)),
            StorageProvider::Abs => Some(("AZURE_APPLICATION_CREDENTIALS", CREDENTIALS_MOUNT_PATH)),
            StorageProvider::Gcs => Some(("GOOGLE_APPLICATION_CREDENTIALS", GCS_CREDENTIALS_FILE)),
            StorageProvider::Swift => Some(("OPENSTACK_APPLICATION_CREDENTIALS", CREDENTIALS_MOUNT_PATH)),
            StorageProvider::Oss => Some(("ALICLOUD_APPLICATION_CREDENTIALS", CREDENTIALS_MOUNT_PATH)),
            StorageProvider::Ocs => Some(("OPENSHIFT_APPLICATION_CREDENTIALS", CREDENTIALS_MOUNT_PATH)),
            StorageProvider::Local | StorageProvider::Ecs => None,
        }
    }
}

/// Mounts, volumes and environment contributed by a backup store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BackupStoreContribution {
    pub volume_mounts: Vec<VolumeMount>,
    pub volumes: Vec<Volume>,
    pub env: Vec<EnvVar>,
}

/// Resolve the backup store. No store or an unknown provider contributes nothing.
pub fn resolve(store: Option<&StoreValues>) -> BackupStoreContribution {
    let store = match store {
        Some(store) => store,
        None => return BackupStoreContribution::default(),
    };
    match store.provider.as_deref().and_then(StorageProvider::from_infra) {
        Some(provider) => resolve_provider(provider, store),
        None => BackupStoreContribution::default(),
    }
}

fn resolve_provider(provider: StorageProvider, store: &StoreValues) -> BackupStoreContribution {
    let secret_name = store.secret_ref.as_ref().and_then(|secret| secret.name.as_deref());
    let mut contribution = BackupStoreContribution::default();

    match provider {
        StorageProvider::Local => {
            if let Some(container) = store.container.as_deref() {
                contribution.volume_mounts.push(VolumeMount {
                    name: HOST_STORAGE_VOLUME.to_string(),
                    mount_path: container.to_string(),
                    ..VolumeMount::default()
                });
                contribution.volumes.push(Volume {
                    name: HOST_STORAGE_VOLUME.to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: format!("{}/{}", LOCAL_PREFIX, container),
                        type_: Some("Directory".to_string()),
                    }),
                    ..Volume::default()
                });
            }
        }
        StorageProvider::Gcs => {
            contribution.volume_mounts.push(backup_secret_mount(GCS_MOUNT_PATH));
            contribution.volumes.push(backup_secret_volume(secret_name));
        }
        StorageProvider::S3
        | StorageProvider::Abs
        | StorageProvider::Swift
        | StorageProvider::Oss
        | StorageProvider::Ocs => {
            contribution
                .volume_mounts
                .push(backup_secret_mount(&format!("{}/", CREDENTIALS_MOUNT_PATH)));
            contribution.volumes.push(backup_secret_volume(secret_name));
        }
        StorageProvider::Ecs => {
            contribution.env = vec![
                env_var_from_secret("ECS_ENDPOINT", secret_name, "endpoint"),
                env_var_from_secret("ECS_ACCESS_KEY_ID", secret_name, "accessKeyID"),
                env_var_from_secret("ECS_SECRET_ACCESS_KEY", secret_name, "secretAccessKey"),
            ];
        }
    }

    if let Some((name, path)) = provider.credentials_env() {
        contribution.env.push(env_var(name, path));
    }

    contribution
}

fn backup_secret_mount(mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: BACKUP_SECRET_VOLUME.to_string(),
        mount_path: mount_path.to_string(),
        ..VolumeMount::default()
    }
}

fn backup_secret_volume(secret_name: Option<&str>) -> Volume {
    Volume {
        name: BACKUP_SECRET_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: secret_name.map(str::to_string),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}
