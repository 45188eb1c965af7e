use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, SecretKeySelector},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};

/// Merge `overrides` on top of `base`; keys in `overrides` win.
pub fn merge_string_maps(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

pub fn env_var_from_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
    }
}

pub fn env_var_from_secret(name: &str, secret_name: Option<&str>, secret_key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.map(str::to_string),
                key: secret_key.to_string(),
                ..SecretKeySelector::default()
            }),
            ..EnvVarSource::default()
        }),
    }
}

/// Controller reference pointing at the owning custom resource.
pub fn controller_owner_reference(api_version: &str, kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_merge_string_maps_overrides_win() {
        let base = map(&[("name", "etcd"), ("instance", "etcd-main")]);
        let overrides = map(&[("instance", "custom"), ("role", "main")]);
        let merged = merge_string_maps(&base, &overrides);
        assert_eq!(merged, map(&[("name", "etcd"), ("instance", "custom"), ("role", "main")]));
    }

    #[test]
    fn test_env_var_from_secret() {
        let env = env_var_from_secret("ECS_ENDPOINT", Some("backup-secret"), "endpoint");
        let selector = env.value_from.unwrap().secret_key_ref.unwrap();
        assert_eq!(selector.name.as_deref(), Some("backup-secret"));
        assert_eq!(selector.key, "endpoint");
        assert!(env.value.is_none());
    }
}
