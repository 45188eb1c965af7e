//! Builds the desired etcd StatefulSet from [`Values`]. Pure, never fails.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy},
        core::v1::{
            Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction, HostAlias,
            KeyToPath, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
            ResourceRequirements, SecretReference, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::ObjectMeta,
    },
};

use super::provider;
use super::values::{TlsConfig, Values};
use crate::utils::{controller_owner_reference, env_var, env_var_from_field, merge_string_maps};

pub const DEFAULT_SERVER_PORT: i32 = 2380;
pub const DEFAULT_CLIENT_PORT: i32 = 2379;
pub const DEFAULT_BACKUP_PORT: i32 = 8080;
pub const DEFAULT_STORAGE_CAPACITY: &str = "16Gi";

const OWNER_API_VERSION: &str = "druid.gardener.cloud/v1alpha1";
const OWNER_KIND: &str = "Etcd";
const CONFIG_VOLUME: &str = "etcd-config-file";
const CONFIG_FILE: &str = "etcd.conf.yaml";

const PROBE_INITIAL_DELAY_SECONDS: i32 = 15;
const PROBE_PERIOD_SECONDS: i32 = 5;
const PROBE_FAILURE_THRESHOLD: i32 = 5;

/// Write everything the deployer owns into `sts`. Anything else (uid, resourceVersion, status,
/// server defaults, labels set by others, ...) is left as fetched.
pub fn compose(values: &Values, sts: &mut StatefulSet) {
    let selector = existing_selector(sts).unwrap_or_else(|| common_labels(values));
    apply_object_meta(values, &mut sts.metadata);
    apply_statefulset_spec(values, &selector, sts.spec.get_or_insert_with(StatefulSetSpec::default));
}

/// Fresh object carrying only the identity, used when nothing exists yet.
pub fn empty_statefulset(values: &Values) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(values.name.clone()),
            namespace: Some(values.namespace.clone()),
            ..ObjectMeta::default()
        },
        ..StatefulSet::default()
    }
}

pub fn common_labels(values: &Values) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), "etcd".to_string());
    labels.insert("instance".to_string(), values.name.clone());
    labels
}

/// Object labels: common labels with the user's labels layered on top.
pub fn object_labels(values: &Values) -> BTreeMap<String, String> {
    merge_string_maps(&common_labels(values), &values.labels)
}

pub fn object_annotations(values: &Values) -> BTreeMap<String, String> {
    let mut owned = BTreeMap::new();
    owned.insert(
        "gardener.cloud/owned-by".to_string(),
        format!("{}/{}", values.namespace, values.name),
    );
    owned.insert("gardener.cloud/owner-type".to_string(), "etcd".to_string());
    merge_string_maps(&owned, &values.annotations)
}

// The selector of an existing StatefulSet is immutable.
fn existing_selector(sts: &StatefulSet) -> Option<BTreeMap<String, String>> {
    sts.spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.clone())
        .filter(|labels| !labels.is_empty())
}

fn apply_object_meta(values: &Values, meta: &mut ObjectMeta) {
    meta.name = Some(values.name.clone());
    meta.namespace = Some(values.namespace.clone());
    merge_into(&mut meta.labels, &object_labels(values));
    merge_into(&mut meta.annotations, &object_annotations(values));

    let owner = controller_owner_reference(OWNER_API_VERSION, OWNER_KIND, &values.name, &values.etcd_uid);
    let owners = meta.owner_references.get_or_insert_with(Vec::new);
    // At most one controller reference is allowed.
    match owners
        .iter_mut()
        .find(|existing| existing.uid == owner.uid || existing.controller == Some(true))
    {
        Some(existing) => *existing = owner,
        None => owners.push(owner),
    }
}

/// Layer `owned` on top of the map in `target`, keeping keys the deployer does not know about.
fn merge_into(target: &mut Option<BTreeMap<String, String>>, owned: &BTreeMap<String, String>) {
    let merged = merge_string_maps(&target.take().unwrap_or_default(), owned);
    *target = non_empty(merged);
}

fn apply_statefulset_spec(values: &Values, selector: &BTreeMap<String, String>, spec: &mut StatefulSetSpec) {
    spec.pod_management_policy = Some("Parallel".to_string());
    spec.update_strategy
        .get_or_insert_with(StatefulSetUpdateStrategy::default)
        .type_ = Some("RollingUpdate".to_string());
    spec.replicas = Some(values.replicas);
    spec.service_name = values.service_name.clone();
    spec.selector.match_labels = Some(selector.clone());
    apply_pod_template(values, selector, &mut spec.template);
    apply_volume_claim_templates(values, &mut spec.volume_claim_templates);
}

fn apply_pod_template(values: &Values, selector: &BTreeMap<String, String>, template: &mut PodTemplateSpec) {
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    merge_into(&mut meta.annotations, &values.annotations);
    // Pods must keep matching the selector whatever the user labels say.
    merge_into(&mut meta.labels, &merge_string_maps(&object_labels(values), selector));

    apply_pod_spec(values, template.spec.get_or_insert_with(PodSpec::default));
}

fn apply_pod_spec(values: &Values, pod: &mut PodSpec) {
    pod.host_aliases = Some(vec![HostAlias {
        ip: Some("127.0.0.1".to_string()),
        hostnames: Some(vec![local_hostname(values)]),
    }]);
    pod.service_account_name = values.service_account_name.clone();
    pod.affinity = values.affinity.clone();
    pod.topology_spread_constraints = values.topology_spread_constraints.clone();
    pod.priority_class_name = values.priority_class_name.clone();
    pod.share_process_namespace = Some(true);
    pod.volumes = Some(volumes(values));

    let mut etcd = take_container(&mut pod.containers, "etcd");
    apply_etcd_container(values, &mut etcd);
    let mut backup_restore = take_container(&mut pod.containers, "backup-restore");
    apply_backup_restore_container(values, &mut backup_restore);
    pod.containers = vec![etcd, backup_restore];
}

// Reuse the fetched container so defaults filled in by the server survive.
fn take_container(containers: &mut Vec<Container>, name: &str) -> Container {
    match containers.iter().position(|container| container.name == name) {
        Some(index) => containers.remove(index),
        None => Container {
            name: name.to_string(),
            ..Container::default()
        },
    }
}

fn local_hostname(values: &Values) -> String {
    format!("{}-local", values.name)
}

fn apply_etcd_container(values: &Values, container: &mut Container) {
    container.image = Some(values.etcd_image.clone());
    container.image_pull_policy = Some("IfNotPresent".to_string());
    container.command = non_empty_vec(values.etcd_command.clone());
    apply_exec_probe(&mut container.readiness_probe, &values.readiness_probe_command);
    apply_exec_probe(&mut container.liveness_probe, &values.liveness_probe_command);
    container.ports = Some(vec![
        tcp_port("server", values.server_port.unwrap_or(DEFAULT_SERVER_PORT)),
        tcp_port("client", values.client_port.unwrap_or(DEFAULT_CLIENT_PORT)),
    ]);
    container.resources = Some(resources_or_default(values.etcd_resources.as_ref()));
    container.env = Some(etcd_env(values));
    container.volume_mounts = Some(etcd_volume_mounts(values));
}

fn apply_backup_restore_container(values: &Values, container: &mut Container) {
    container.image = Some(values.backup_image.clone());
    container.image_pull_policy = Some("IfNotPresent".to_string());
    container.command = non_empty_vec(values.etcd_backup_command.clone());
    container.ports = Some(vec![tcp_port("server", backup_port(values))]);
    container.resources = Some(resources_or_default(values.backup_resources.as_ref()));
    container.env = Some(backup_restore_env(values));
    container.volume_mounts = Some(backup_restore_volume_mounts(values));
    container
        .security_context
        .get_or_insert_with(SecurityContext::default)
        .capabilities
        .get_or_insert_with(Capabilities::default)
        .add = Some(vec!["SYS_PTRACE".to_string()]);
}

fn apply_exec_probe(probe: &mut Option<Probe>, command: &[String]) {
    let probe = probe.get_or_insert_with(Probe::default);
    probe.exec = Some(ExecAction {
        command: non_empty_vec(command.to_vec()),
    });
    probe.initial_delay_seconds = Some(PROBE_INITIAL_DELAY_SECONDS);
    probe.period_seconds = Some(PROBE_PERIOD_SECONDS);
    probe.failure_threshold = Some(PROBE_FAILURE_THRESHOLD);
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        container_port: port,
        ..ContainerPort::default()
    }
}

fn backup_port(values: &Values) -> i32 {
    values.backup_port.unwrap_or(DEFAULT_BACKUP_PORT)
}

pub fn default_resource_requirements() -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("50m".to_string()));
    requests.insert("memory".to_string(), Quantity("128Mi".to_string()));
    ResourceRequirements {
        requests: Some(requests),
        ..ResourceRequirements::default()
    }
}

fn resources_or_default(resources: Option<&ResourceRequirements>) -> ResourceRequirements {
    resources.cloned().unwrap_or_else(default_resource_requirements)
}

fn etcd_env(values: &Values) -> Vec<EnvVar> {
    let tls = values.backup_tls.is_some();
    let protocol = if tls { "https" } else { "http" };
    vec![
        env_var("ENABLE_TLS", &tls.to_string()),
        env_var(
            "BACKUP_ENDPOINT",
            &format!("{}://{}:{}", protocol, local_hostname(values), backup_port(values)),
        ),
    ]
}

fn backup_restore_env(values: &Values) -> Vec<EnvVar> {
    let container = values
        .backup_store
        .as_ref()
        .and_then(|store| store.container.as_deref())
        .unwrap_or_default();

    let mut env = vec![
        env_var("STORAGE_CONTAINER", container),
        env_var_from_field("POD_NAME", "metadata.name"),
        env_var_from_field("POD_NAMESPACE", "metadata.namespace"),
    ];
    env.extend(provider::resolve(values.backup_store.as_ref()).env);
    env
}

fn mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        ..VolumeMount::default()
    }
}

fn etcd_volume_mounts(values: &Values) -> Vec<VolumeMount> {
    let mut mounts = vec![mount(&values.volume_claim_template_name, "/var/etcd/data/")];
    mounts.extend(tls_volume_mounts(values));
    mounts
}

fn backup_restore_volume_mounts(values: &Values) -> Vec<VolumeMount> {
    let mut mounts = vec![
        mount(&values.volume_claim_template_name, "/var/etcd/data"),
        mount(CONFIG_VOLUME, "/var/etcd/config/"),
    ];
    mounts.extend(tls_volume_mounts(values));
    mounts.extend(provider::resolve(values.backup_store.as_ref()).volume_mounts);
    mounts
}

fn tls_volume_mounts(values: &Values) -> Vec<VolumeMount> {
    let mut mounts = Vec::new();
    if values.client_url_tls.is_some() {
        mounts.push(mount("client-url-ca-etcd", "/var/etcd/ssl/client/ca"));
        mounts.push(mount("client-url-etcd-server-tls", "/var/etcd/ssl/client/server"));
        mounts.push(mount("client-url-etcd-client-tls", "/var/etcd/ssl/client/client"));
    }
    if values.peer_url_tls.is_some() {
        mounts.push(mount("peer-url-ca-etcd", "/var/etcd/ssl/peer/ca"));
        mounts.push(mount("peer-url-etcd-server-tls", "/var/etcd/ssl/peer/server"));
    }
    mounts
}

fn secret_volume(name: &str, secret: &SecretReference) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: secret.name.clone(),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn volumes(values: &Values) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(values.config_map_name.clone()),
            items: Some(vec![KeyToPath {
                key: CONFIG_FILE.to_string(),
                path: CONFIG_FILE.to_string(),
                ..KeyToPath::default()
            }]),
            default_mode: Some(0o644),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }];

    if let Some(TlsConfig {
        tls_ca_secret_ref,
        server_tls_secret_ref,
        client_tls_secret_ref,
    }) = &values.client_url_tls
    {
        volumes.push(secret_volume("client-url-ca-etcd", tls_ca_secret_ref));
        volumes.push(secret_volume("client-url-etcd-server-tls", server_tls_secret_ref));
        volumes.push(secret_volume("client-url-etcd-client-tls", client_tls_secret_ref));
    }

    if let Some(tls) = &values.peer_url_tls {
        volumes.push(secret_volume("peer-url-ca-etcd", &tls.tls_ca_secret_ref));
        volumes.push(secret_volume("peer-url-etcd-server-tls", &tls.server_tls_secret_ref));
    }

    volumes.extend(provider::resolve(values.backup_store.as_ref()).volumes);
    volumes
}

fn apply_volume_claim_templates(values: &Values, templates: &mut Option<Vec<PersistentVolumeClaim>>) {
    let name = &values.volume_claim_template_name;
    let existing = templates
        .take()
        .unwrap_or_default()
        .into_iter()
        .find(|claim| claim.metadata.name.as_ref() == Some(name));
    let mut claim = existing.unwrap_or_else(|| PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..ObjectMeta::default()
        },
        ..PersistentVolumeClaim::default()
    });

    let capacity = values
        .storage_capacity
        .clone()
        .unwrap_or_else(|| Quantity(DEFAULT_STORAGE_CAPACITY.to_string()));
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), capacity);

    let spec = claim.spec.get_or_insert_with(PersistentVolumeClaimSpec::default);
    spec.access_modes = Some(vec!["ReadWriteOnce".to_string()]);
    spec.storage_class_name = values.storage_class.clone();
    spec.resources.get_or_insert_with(ResourceRequirements::default).requests = Some(requests);

    *templates = Some(vec![claim]);
}

fn non_empty<K: Ord, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn non_empty_vec<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
