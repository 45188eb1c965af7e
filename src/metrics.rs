use prometheus::{IntCounterVec, Opts, Registry};

use lazy_static::lazy_static;

pub const METRICS_NAMESPACE: &str = "etcd_statefulset";

lazy_static! {
    pub static ref KUBE_ERRORS: IntCounterVec = IntCounterVec::new(
      Opts::new("kube_errors", "etcd statefulset k8s related errors")
      .namespace(METRICS_NAMESPACE),
      &["action", "kube_name"]
    ).unwrap();
    pub static ref WAIT_OUTCOMES: IntCounterVec = IntCounterVec::new(
      Opts::new("wait_outcomes", "etcd statefulset wait results")
      .namespace(METRICS_NAMESPACE),
      &["operation", "outcome"]
    ).unwrap();
}

pub fn custom_metrics(registry: &Registry) -> prometheus::Result<()> {
  registry.register(Box::new(KUBE_ERRORS.clone()))?;
  registry.register(Box::new(WAIT_OUTCOMES.clone()))?;
  Ok(())
}

pub fn kube_error_name(err: &kube::Error) -> &'static str {
  match err {
    kube::Error::Api(response) if response.code == 404 => "not_found",
    kube::Error::Api(response) if response.code == 409 => "conflict",
    kube::Error::Api(_) => "api",
    kube::Error::SerdeError(_) => "serde_error",
    _ => "transport",
  }
}

pub fn kube_error_happened(action: &str, err: &kube::Error) {
  KUBE_ERRORS.with_label_values(&[action, kube_error_name(err)]).inc();
}

pub fn wait_finished(operation: &str, outcome: &str) {
  WAIT_OUTCOMES.with_label_values(&[operation, outcome]).inc();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::errors::{not_found, server_error};

  #[test]
  fn test_kube_error_name() {
    assert_eq!(kube_error_name(&not_found()), "not_found");
    assert_eq!(kube_error_name(&server_error()), "api");
  }

  #[test]
  fn test_kube_error_happened_counts() {
    let counter = KUBE_ERRORS.with_label_values(&["test_get", "api"]);
    let before = counter.get();
    kube_error_happened("test_get", &server_error());
    assert_eq!(counter.get(), before + 1);
  }

  #[test]
  fn test_custom_metrics_registers_once() {
    let registry = Registry::new();
    assert!(custom_metrics(&registry).is_ok());
    assert!(custom_metrics(&registry).is_err());
  }
}
