use etcd_statefulset::{errors, metrics, Action, Config, EtcdEnvironmentConfig, KubeStatefulSetClient, StatefulSetDeployer, Values};
use kube::client::Client;
use log::{debug, info, warn};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let env_config: EtcdEnvironmentConfig = match envy::from_env::<EtcdEnvironmentConfig>() {
       Ok(config) => config,
       Err(error) => panic!("Failed to load environment config: {:#?}", error)
    };
    debug!("Environment config: {:?}", &env_config);
    let config = Config::from_env_config(env_config)?;
    info!("Starting with config: {:?}", config);

    let registry = Registry::new();
    if let Err(err) = metrics::custom_metrics(&registry) {
        warn!("Failed to register metrics: {}", err);
    }

    let values = Values::from_file(&config.values_file)?;
    let client = Client::try_default().await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let deployer = StatefulSetDeployer::new(KubeStatefulSetClient::new(client), values)
        .with_wait_config(config.wait)
        .with_cancellation(cancel);

    let result = match config.action {
        Action::Deploy => match deployer.deploy().await {
            Ok(()) => deployer.wait().await,
            Err(err) => Err(err),
        },
        Action::Destroy => match deployer.destroy().await {
            Ok(()) => deployer.wait_cleanup().await,
            Err(err) => Err(err),
        },
    };

    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&registry.gather(), &mut buffer).is_ok() {
        debug!("Metrics:\n{}", String::from_utf8_lossy(&buffer));
    }

    result
}
