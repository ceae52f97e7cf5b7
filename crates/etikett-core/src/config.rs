// SPDX-License-Identifier: Apache-2.0
//
// Daemon configuration.
//
// The backpressure timeout, poll interval, and job retention window are
// deliberately configuration values, not constants: their thresholds are
// deployment policy, not protocol-mandated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EtikettError, Result};
use crate::types::{DeviceAddress, DriverKind, LabelMedia};

/// One configured printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Printer name, used in IPP resource paths (`/ipp/print/{name}`).
    pub name: String,
    pub driver: DriverKind,
    pub address: DeviceAddress,
    #[serde(default = "default_media")]
    pub default_media: LabelMedia,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

fn default_media() -> LabelMedia {
    LabelMedia::Address
}

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// TCP port for the IPP server (631 needs privileges; 8631 is the
    /// unprivileged default).
    pub server_port: u16,
    /// Hostname advertised via DNS-SD and used in printer URIs.
    pub hostname: Option<String>,
    /// Path to the job database.  `None` keeps jobs in memory only.
    pub store_path: Option<PathBuf>,
    /// Interval between transport status polls during backpressure, in
    /// milliseconds.
    pub poll_interval_ms: u64,
    /// How long a job may sit in a blocking condition (out of media,
    /// cover open) before it is aborted, in milliseconds.
    pub backpressure_timeout_ms: u64,
    /// How long terminal jobs are retained before purge, in seconds.
    pub retention_secs: u64,
    /// Printers to register at startup.
    #[serde(default)]
    pub printers: Vec<PrinterConfig>,
    /// Users allowed to run administrative operations (Set-Printer-
    /// Attributes, cancelling other users' jobs).  Empty means everyone
    /// is allowed, which suits a trusted local network.
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server_port: 8631,
            hostname: None,
            store_path: None,
            poll_interval_ms: 1_000,
            backpressure_timeout_ms: 30_000,
            retention_secs: 300,
            printers: Vec::new(),
            admins: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EtikettError::Config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| EtikettError::Config(format!("parse {}: {e}", path.as_ref().display())))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
