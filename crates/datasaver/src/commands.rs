//! CLI command implementations

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use datasaver_authority::{FileAuthority, spawn_watcher};
use datasaver_core::{DataSaverBackend, DataSaverListener, Policy, Uid};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use crate::config::{Config, MetricsConfig};

/// Listener that reports every change through the log
pub struct LoggingListener;

impl DataSaverListener for LoggingListener {
    fn on_data_saver_changed(&self, enabled: bool) {
        info!("Data saver is {}", if enabled { "on" } else { "off" });
    }

    fn on_whitelist_status_changed(&self, uid: Uid, whitelisted: bool) {
        if whitelisted {
            info!("uid {} may use metered data in the background", uid);
        } else {
            info!("uid {} lost unrestricted metered data access", uid);
        }
    }

    fn on_blacklist_status_changed(&self, uid: Uid, blacklisted: bool) {
        if blacklisted {
            info!("uid {} is restricted from metered background data", uid);
        } else {
            info!("uid {} is no longer restricted", uid);
        }
    }
}

/// Render the data saver state and both lists
pub fn status(backend: &DataSaverBackend) -> Result<String> {
    let enabled = backend.is_data_saver_enabled()?;
    let allowed = backend.whitelisted_uids()?;
    let restricted = backend.blacklisted_uids()?;

    let mut out = String::new();
    writeln!(out, "{}", data_saver_line(enabled))?;
    writeln!(out, "Unrestricted ({}): {}", allowed.len(), join_uids(&allowed))?;
    writeln!(out, "Restricted ({}): {}", restricted.len(), join_uids(&restricted))?;
    Ok(out)
}

/// Turn data saver on or off, returning the state read back from the store
pub fn set_enabled(backend: &DataSaverBackend, enabled: bool) -> Result<String> {
    backend.set_data_saver_enabled(enabled)?;
    Ok(data_saver_line(backend.is_data_saver_enabled()?))
}

fn data_saver_line(enabled: bool) -> String {
    format!("Data saver: {}", if enabled { "on" } else { "off" })
}

fn join_uids(uids: &[Uid]) -> String {
    if uids.is_empty() {
        return "-".to_string();
    }
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Apply `policy` to one app.
///
/// The opposite list is cleared first, the same way the settings screens
/// pair their writes.
pub fn set_policy(
    backend: &DataSaverBackend,
    uid: Uid,
    package_name: &str,
    policy: Policy,
) -> Result<()> {
    match policy {
        Policy::AllowMeteredBackground => {
            backend.set_is_blacklisted(uid, package_name, false)?;
            backend.set_is_whitelisted(uid, package_name, true)?;
        }
        Policy::RejectMeteredBackground => {
            backend.set_is_whitelisted(uid, package_name, false)?;
            backend.set_is_blacklisted(uid, package_name, true)?;
        }
        Policy::None => {
            backend.set_is_whitelisted(uid, package_name, false)?;
            backend.set_is_blacklisted(uid, package_name, false)?;
        }
    }
    Ok(())
}

/// Follow the policy store until Ctrl-C, logging every change
pub async fn watch(
    backend: &DataSaverBackend,
    authority: Arc<FileAuthority>,
    config: &Config,
) -> Result<()> {
    if config.metrics.enabled {
        install_metrics_exporter(&config.metrics)?;
    }

    let handle = backend.add_listener(Rc::new(LoggingListener))?;
    backend.whitelisted_count()?;
    backend.blacklisted_count()?;

    let period = Duration::from_millis(config.watch.validated_poll_interval_ms());
    let watcher = spawn_watcher(authority, period);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = backend.next_event() => {
                let Some(event) = event else {
                    break;
                };
                if let Err(e) = backend.handle_event(event) {
                    warn!("Failed to apply {:?}: {}", event, e);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    watcher.abort();
    backend.remove_listener(handle)?;
    info!("Stopped watching");
    Ok(())
}

fn install_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid metrics address {}:{}", config.bind_address, config.port))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
