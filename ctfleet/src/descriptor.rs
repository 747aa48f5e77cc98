//! Resource descriptors - what each target should look like.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{DescriptorError, FieldDrift};

/// Numeric resource identifier, unique across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        ResourceId(id)
    }
}

/// Address assignment for a network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum IpConfig {
    Dhcp,
    Static {
        /// Address with prefix length, e.g. `10.0.0.5/24`.
        cidr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway: Option<String>,
    },
}

impl IpConfig {
    /// The address part of a static CIDR.
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            IpConfig::Dhcp => None,
            IpConfig::Static { cidr, .. } => parse_cidr(cidr).map(|(addr, _)| addr),
        }
    }
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

/// Network interface attached to the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default = "default_nic_name")]
    pub name: String,
    pub bridge: String,
    pub ip: IpConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u16>,
}

fn default_nic_name() -> String {
    "eth0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Nfs,
}

/// A bind or network mount inside the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Everything needed to create one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub hostname: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub network: NetworkInterface,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

/// Hardware fields of an existing resource as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub hostname: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl ResourceDescriptor {
    /// Reject descriptors that are not fully determined.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let id = self.id;
        if id.0 == 0 {
            return Err(DescriptorError::ZeroId);
        }
        if !is_valid_hostname(&self.hostname) {
            return Err(DescriptorError::InvalidHostname {
                id,
                hostname: self.hostname.clone(),
            });
        }
        for (field, value) in [
            ("cores", u64::from(self.cores)),
            ("memory_mb", self.memory_mb),
            ("disk_gb", self.disk_gb),
        ] {
            if value == 0 {
                return Err(DescriptorError::ZeroCapacity { id, field });
            }
        }
        if let IpConfig::Static { cidr, gateway } = &self.network.ip {
            if parse_cidr(cidr).is_none() {
                return Err(DescriptorError::InvalidAddress {
                    id,
                    value: cidr.clone(),
                });
            }
            if let Some(gw) = gateway.as_ref().filter(|gw| gw.parse::<IpAddr>().is_err()) {
                return Err(DescriptorError::InvalidAddress {
                    id,
                    value: gw.clone(),
                });
            }
        }
        for (index, mount) in self.mounts.iter().enumerate() {
            if mount.source.trim().is_empty() {
                return Err(DescriptorError::EmptyMountPath {
                    id,
                    index,
                    field: "source",
                });
            }
            if mount.target.trim().is_empty() {
                return Err(DescriptorError::EmptyMountPath {
                    id,
                    index,
                    field: "target",
                });
            }
        }
        Ok(())
    }

    /// Host the readiness probe connects to.
    pub fn probe_address(&self) -> String {
        match self.network.ip.address() {
            Some(addr) => addr.to_string(),
            None => self.hostname.clone(),
        }
    }

    /// Fields where an existing resource differs from this descriptor.
    pub fn drift(&self, existing: &ResourceConfig) -> Vec<FieldDrift> {
        let mut drift = Vec::new();
        if !existing.hostname.eq_ignore_ascii_case(&self.hostname) {
            drift.push(FieldDrift {
                field: "hostname",
                existing: existing.hostname.clone(),
                desired: self.hostname.clone(),
            });
        }
        if existing.cores != self.cores {
            drift.push(FieldDrift {
                field: "cores",
                existing: existing.cores.to_string(),
                desired: self.cores.to_string(),
            });
        }
        if existing.memory_mb != self.memory_mb {
            drift.push(FieldDrift {
                field: "memory_mb",
                existing: existing.memory_mb.to_string(),
                desired: self.memory_mb.to_string(),
            });
        }
        if existing.disk_gb != self.disk_gb {
            drift.push(FieldDrift {
                field: "disk_gb",
                existing: existing.disk_gb.to_string(),
                desired: self.disk_gb.to_string(),
            });
        }
        drift
    }
}

/// RFC 1123 hostname: dot-separated labels of alphanumerics and inner hyphens.
fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
