use log::{error, info, warn};
use msmart_lan::client::{Cloud, UreqHttpClient};
use msmart_lan::config::{Config, configure_env_from_args};
use msmart_lan::device::{Device, HeatPump};
use msmart_lan::models::command::DeviceType;
use msmart_lan::security::{DeviceCredentials, Security, udp_id};
use msmart_lan::transport::TcpTransport;
use std::sync::Arc;

async fn fetch_credentials(cfg: &Config) -> Result<DeviceCredentials, String> {
    let udpid = udp_id(cfg.device_id);
    info!("Fetching token for device {} (udpid {}) from the cloud", cfg.device_id, udpid);

    let cloud = Cloud::new(
        cfg.account.clone(),
        cfg.password.clone(),
        cfg.cloud_server.clone(),
        Arc::new(UreqHttpClient::default()),
    )
    .with_retries(cfg.cloud_retries);

    cloud.login(false).await.map_err(|e| format!("Cloud login failed: {}", e))?;
    let token_key = cloud
        .get_token(&udpid)
        .await
        .map_err(|e| format!("Token lookup failed: {}", e))?
        .ok_or_else(|| format!("No token for udpid {} on this account", udpid))?;

    DeviceCredentials::from_hex(&token_key.token, &token_key.key).map_err(|e| format!("Cloud returned bad token/key: {}", e))
}

async fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env().map_err(|e| e.to_string())?;
    info!(
        "Config loaded (device={}:{}, id={}, timeout={}s, preprovisioned={}, cloud={:?}, cloud_retries={})",
        cfg.device_ip,
        cfg.device_port,
        cfg.device_id,
        cfg.device_timeout.as_secs(),
        cfg.credentials.is_some(),
        cfg.cloud_server,
        cfg.cloud_retries
    );

    // 2) Token and key, configured or from the cloud
    let credentials = match cfg.credentials.clone() {
        Some(c) => c,
        None => fetch_credentials(&cfg).await?,
    };

    // 3) Connect and authenticate
    let transport = Arc::new(TcpTransport::new(&cfg.device_ip, cfg.device_port, cfg.device_timeout));
    let device = Device::new(
        cfg.device_ip.clone(),
        cfg.device_port,
        cfg.device_id,
        DeviceType::HeatPump,
        transport,
        Security::default(),
    )
    .with_timeout(cfg.device_timeout);
    let mut heat_pump = HeatPump::new(device);

    heat_pump
        .device_mut()
        .authenticate(&credentials)
        .await
        .map_err(|e| format!("Authentication with {}:{} failed: {}", cfg.device_ip, cfg.device_port, e))?;

    // 4) Query state
    heat_pump.refresh().await;
    if !heat_pump.online() {
        return Err(format!("{} did not answer", heat_pump));
    }
    if !heat_pump.supported() {
        warn!("{} answered but no response could be decoded", heat_pump);
        return Ok(());
    }
    heat_pump.refresh_eco().await;

    info!("{}", heat_pump);
    info!("{:#?}", heat_pump.state());
    Ok(())
}

fn main() {
    let loaded_env = match configure_env_from_args(std::env::args_os().skip(1)) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "msmart-lan {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("fatal: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run()) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
