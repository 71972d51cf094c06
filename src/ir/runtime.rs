use super::expr::Expr;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static MEMORY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*([A-Za-z]*)\s*$").ok());
static DISK_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)([0-9]+)(?:\s+(?:HDD|SSD|LOCAL))?\s*(?:,|$)").ok());

/// Runtime keys every writer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuntimeKey {
    Container,
    Cpu,
    Memory,
    Disks,
    Gpu,
    Preemptible,
    MaxRetries,
    Zones,
    BootDiskSizeGb,
    ReturnCodes,
}

impl RuntimeKey {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "docker" | "container" => Some(RuntimeKey::Container),
            "cpu" | "cpus" => Some(RuntimeKey::Cpu),
            "memory" => Some(RuntimeKey::Memory),
            "disks" | "disk" => Some(RuntimeKey::Disks),
            "gpu" | "gpuCount" => Some(RuntimeKey::Gpu),
            "preemptible" => Some(RuntimeKey::Preemptible),
            "maxRetries" => Some(RuntimeKey::MaxRetries),
            "zones" => Some(RuntimeKey::Zones),
            "bootDiskSizeGb" => Some(RuntimeKey::BootDiskSizeGb),
            "returnCodes" => Some(RuntimeKey::ReturnCodes),
            _ => None,
        }
    }

    /// Canonical WDL 1.0 spelling.
    pub fn name(self) -> &'static str {
        match self {
            RuntimeKey::Container => "docker",
            RuntimeKey::Cpu => "cpu",
            RuntimeKey::Memory => "memory",
            RuntimeKey::Disks => "disks",
            RuntimeKey::Gpu => "gpu",
            RuntimeKey::Preemptible => "preemptible",
            RuntimeKey::MaxRetries => "maxRetries",
            RuntimeKey::Zones => "zones",
            RuntimeKey::BootDiskSizeGb => "bootDiskSizeGb",
            RuntimeKey::ReturnCodes => "returnCodes",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub settings: BTreeMap<RuntimeKey, Expr>,
    /// Engine-specific keys with no recognized meaning.
    pub extensions: BTreeMap<String, Expr>,
}

impl Runtime {
    pub fn insert(&mut self, name: &str, value: Expr) {
        match RuntimeKey::from_name(name) {
            Some(key) => {
                self.settings.insert(key, value);
            }
            None => {
                self.extensions.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, key: RuntimeKey) -> Option<&Expr> {
        self.settings.get(&key)
    }

    pub fn container(&self) -> Option<&Expr> {
        self.get(RuntimeKey::Container)
    }

    pub fn memory(&self) -> Option<&Expr> {
        self.get(RuntimeKey::Memory)
    }

    pub fn cpu(&self) -> Option<&Expr> {
        self.get(RuntimeKey::Cpu)
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty() && self.extensions.is_empty()
    }
}

fn unit_bytes(unit: &str) -> Option<f64> {
    let factor = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "K" | "KB" => 1e3,
        "M" | "MB" => 1e6,
        "G" | "GB" => 1e9,
        "T" | "TB" => 1e12,
        "KI" | "KIB" => 1024.0,
        "MI" | "MIB" => 1024.0 * 1024.0,
        "GI" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TI" | "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(factor)
}

/// Bytes in mebibytes, rounded up. `None` when the result does not fit.
pub fn bytes_to_mib(bytes: f64) -> Option<u64> {
    let mib = (bytes / (1024.0 * 1024.0)).ceil();
    (mib.is_finite() && mib >= 0.0 && mib < u64::MAX as f64).then(|| mib as u64)
}

/// `"4 GB"`, `"512MiB"`, `"2G"` in mebibytes, rounded up.
pub fn memory_to_mib(text: &str) -> Option<u64> {
    let caps = MEMORY_PATTERN.as_ref()?.captures(text)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    bytes_to_mib(amount * unit_bytes(caps.get(2).map_or("", |m| m.as_str()))?)
}

/// Total size of a `disks` value such as `"local-disk 100 HDD"` in mebibytes.
/// Sizes are gigabytes per the WDL runtime conventions.
pub fn disks_to_mib(text: &str) -> Option<u64> {
    let re = DISK_PATTERN.as_ref()?;
    let mut total_gb = 0u64;
    let mut found = false;
    for spec in text.split(',') {
        if let Some(caps) = re.captures(spec.trim()) {
            let gb: u64 = caps.get(1)?.as_str().parse().ok()?;
            total_gb = total_gb.checked_add(gb)?;
            found = true;
        }
    }
    if !found {
        return None;
    }
    bytes_to_mib(total_gb as f64 * 1e9)
}
