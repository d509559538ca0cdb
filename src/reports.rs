//! Periodic side reports - metrics, inventory and lab wallpaper policy

use crate::acquire::FileAcquirer;
use crate::bridge::{Directive, SessionBridge};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::platform::SystemActions;
use crate::rpc::InventoryRpc;
use crate::update::VersionStore;
use anyhow::{Context, Result};
use lab_agent_shared::LabPolicy;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use tracing::{debug, info};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const WALLPAPER_TIMEOUT: Duration = Duration::from_secs(30);
const WALLPAPER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

fn gb(bytes: u64) -> f64 {
    round2(bytes as f64 / GIB)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / whole as f64)
}

/// Cache file name for a wallpaper URL, keeping a known image extension
pub fn wallpaper_cache_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| WALLPAPER_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("lab_wallpaper.{ext}")
}

fn same_path(a: &Path, b: &Path) -> bool {
    let norm = |p: &Path| {
        p.to_string_lossy()
            .replace('\\', "/")
            .trim_end_matches('/')
            .to_string()
    };
    norm(a) == norm(b)
}

/// What the wallpaper check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WallpaperAction {
    /// Policy disabled or no URL configured
    Skipped,
    /// The lab image is already the desktop wallpaper
    Current,
    Applied(PathBuf),
    /// Handed to the session bridge
    Staged(PathBuf),
}

pub struct Reporter {
    rpc: Arc<dyn InventoryRpc>,
    system: Arc<dyn SystemActions>,
    acquirer: Arc<FileAcquirer>,
    bridge: Arc<SessionBridge>,
    versions: VersionStore,
    config: Arc<AgentConfig>,
    sys: Mutex<System>,
}

impl Reporter {
    pub fn new(
        rpc: Arc<dyn InventoryRpc>,
        system: Arc<dyn SystemActions>,
        acquirer: Arc<FileAcquirer>,
        bridge: Arc<SessionBridge>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            rpc,
            system,
            acquirer,
            bridge,
            versions: VersionStore::from_config(&config),
            config,
            sys: Mutex::new(System::new()),
        }
    }

    /// Lightweight load snapshot
    ///
    /// CPU usage is measured since the previous snapshot, so the first one
    /// after startup reads close to zero.
    pub fn metrics_snapshot(&self) -> Value {
        let (cpu, mem_total, mem_free, processes) = match self.sys.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                sys.refresh_processes();
                (
                    round2(sys.global_cpu_info().cpu_usage() as f64),
                    sys.total_memory(),
                    sys.available_memory(),
                    sys.processes().len(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_usage: Vec<Value> = disks
            .list()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space();
                json!({
                    "mount": d.mount_point().display().to_string(),
                    "total_gb": gb(total),
                    "free_gb": gb(free),
                    "percent": percent(total.saturating_sub(free), total),
                })
            })
            .collect();

        let networks = Networks::new_with_refreshed_list();
        let (mut sent, mut recv, mut packets_sent, mut packets_recv) = (0u64, 0u64, 0u64, 0u64);
        for (_, data) in networks.iter() {
            sent += data.total_transmitted();
            recv += data.total_received();
            packets_sent += data.total_packets_transmitted();
            packets_recv += data.total_packets_received();
        }

        json!({
            "cpu_usage_percent": cpu,
            "memory_usage_percent": percent(mem_total.saturating_sub(mem_free), mem_total),
            "memory_total_gb": gb(mem_total),
            "memory_free_gb": gb(mem_free),
            "disk_usage": disk_usage,
            "network_stats": {
                "bytes_sent": sent,
                "bytes_recv": recv,
                "packets_sent": packets_sent,
                "packets_recv": packets_recv,
            },
            "uptime_seconds": System::uptime(),
            "processes_count": processes,
        })
    }

    fn hardware_info(&self) -> Value {
        let (logical, physical, processor, mem_total, mem_free) = match self.sys.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.cpus().len(),
                    sys.physical_core_count(),
                    sys.cpus().first().map(|c| c.brand().trim().to_string()).unwrap_or_default(),
                    sys.total_memory(),
                    sys.available_memory(),
                )
            }
            Err(_) => (0, None, String::new(), 0, 0),
        };

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(t, f), d| (t + d.total_space(), f + d.available_space()));

        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<Value> = networks
            .iter()
            .map(|(name, data)| json!({ "name": name, "mac": data.mac_address().to_string() }))
            .collect();
        interfaces.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        json!({
            "cpu": {
                "physical_cores": physical,
                "logical_cores": logical,
                "processor": processor,
            },
            "memory": {
                "total_gb": gb(mem_total),
                "available_gb": gb(mem_free),
            },
            "disk": {
                "total_gb": gb(disk_total),
                "used_gb": gb(disk_total.saturating_sub(disk_free)),
                "free_gb": gb(disk_free),
            },
            "network": interfaces,
            "os": {
                "system": System::name().unwrap_or_default(),
                "release": System::kernel_version().unwrap_or_default(),
                "version": System::os_version().unwrap_or_default(),
            },
        })
    }

    /// Full hardware and software report
    pub async fn inventory_report(&self) -> Value {
        let softwares = self.system.installed_software().await;
        json!({
            "hardware_info": self.hardware_info(),
            "softwares": softwares,
            "agent_version": self.versions.current(),
            "hostname": self.system.hostname(),
        })
    }

    pub async fn push_metrics(&self, token: &str, server_id: u64) -> Result<(), AgentError> {
        let snapshot = self.metrics_snapshot();
        self.rpc.submit_metrics(token, server_id, &snapshot).await?;
        debug!("[REPORT] Metrics sent");
        Ok(())
    }

    pub async fn push_inventory(&self, token: &str, server_id: u64) -> Result<(), AgentError> {
        let report = self.inventory_report().await;
        let software = report["softwares"].as_array().map_or(0, |s| s.len());
        self.rpc.submit_inventory(token, server_id, &report).await?;
        info!("[REPORT] Inventory sent ({} software packages)", software);
        Ok(())
    }

    /// Make the lab's default wallpaper the desktop wallpaper
    pub async fn enforce_wallpaper(&self, policy: &LabPolicy) -> Result<WallpaperAction> {
        if !policy.wallpaper_enabled {
            return Ok(WallpaperAction::Skipped);
        }
        let Some(url) = policy.wallpaper_url.as_deref() else {
            return Ok(WallpaperAction::Skipped);
        };
        let url = self.config.absolute_url(url);

        let cache_dir = self.config.scratch_dir();
        let name = wallpaper_cache_name(&url);
        let image = self
            .acquirer
            .download(None, &url, &cache_dir, Some(&name), WALLPAPER_TIMEOUT)
            .await
            .context("fetching lab wallpaper")?;

        if self.system.has_interactive_session() {
            if let Some(current) = self.system.current_wallpaper().await {
                if same_path(&current, &image) {
                    return Ok(WallpaperAction::Current);
                }
            }
            self.system.apply_wallpaper(&image).await?;
            info!("[REPORT] Lab wallpaper applied: {}", image.display());
            Ok(WallpaperAction::Applied(image))
        } else {
            self.bridge.dispatch(&Directive::Wallpaper(image.clone())).await?;
            info!("[REPORT] Lab wallpaper staged for the user session");
            Ok(WallpaperAction::Staged(image))
        }
    }
}
