//! Connection descriptor consumed by the kernel at startup.
//!
//! The front-end writes a connection file naming five endpoints plus the
//! signature scheme and key; the kernel binds one socket per port and never
//! writes the file back.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::WireError;

fn default_transport() -> String {
    "tcp".to_owned()
}

fn default_scheme() -> String {
    "hmac-sha256".to_owned()
}

/// Parsed contents of a Jupyter connection file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    pub ip: String,
    pub control_port: u16,
    pub shell_port: u16,
    pub stdin_port: u16,
    pub hb_port: u16,
    pub iopub_port: u16,
    #[serde(default = "default_scheme")]
    pub signature_scheme: String,
    #[serde(default)]
    pub key: String,
}

impl ConnectionInfo {
    /// Load and parse a connection file.
    pub fn from_file(path: &Path) -> Result<Self, WireError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Endpoint URL for one port, e.g. `tcp://127.0.0.1:5555`.
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }
}
