// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Identity Snapshot
//!
//! The immutable, per-run description of the simulated device. Built once by
//! the supervisor from the `identity` section of the config and handed to
//! every responder at spawn. Responders only ever read it.
//!
//! Counters such as `page_count` are *starting* values: the snapshot is not a
//! live device model, and nothing in the runtime increments them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A static value attached to an extra OID or other configured lookup entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticValue {
    Integer(i64),
    Text(String),
}

/// `identity:` section of the device config, as written by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_system_name")]
    pub system_name: String,

    /// Device name answered by name resolution and reported as sysName
    pub hostname: String,

    /// Address the provisioning step assigned to this host
    pub ip: Ipv4Addr,

    #[serde(default = "default_mac")]
    pub mac: String,

    #[serde(default = "default_serial")]
    pub serial: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_firmware")]
    pub firmware: String,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "default_contact")]
    pub contact: String,

    /// Stable endpoint UUID for WS-Discovery. Derived from the serial when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    #[serde(default)]
    pub page_count: u64,

    #[serde(default = "default_toner_level")]
    pub toner_level: u32,

    #[serde(default = "default_toner_capacity")]
    pub toner_capacity: u32,

    #[serde(default = "default_memory")]
    pub memory: String,

    /// Additional static SNMP entries (dotted OID -> value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_oids: BTreeMap<String, StaticValue>,
}

/// Read-only view of the device attributes for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub system_name: String,
    pub hostname: String,
    pub ip: Ipv4Addr,
    pub mac: String,
    pub serial: String,
    pub model: String,
    pub firmware: String,
    pub location: String,
    pub contact: String,
    pub device_uuid: Uuid,
    pub page_count: u64,
    pub toner_level: u32,
    pub toner_capacity: u32,
    pub memory: String,
    #[serde(default)]
    pub extra_oids: BTreeMap<String, StaticValue>,
}

impl IdentitySnapshot {
    pub fn from_config(config: &IdentityConfig) -> Self {
        let device_uuid = config
            .uuid
            .unwrap_or_else(|| derive_device_uuid(&config.serial, &config.mac));

        Self {
            system_name: config.system_name.clone(),
            hostname: config.hostname.clone(),
            ip: config.ip,
            mac: config.mac.clone(),
            serial: config.serial.clone(),
            model: config.model.clone(),
            firmware: config.firmware.clone(),
            location: config.location.clone(),
            contact: config.contact.clone(),
            device_uuid,
            page_count: config.page_count,
            toner_level: config.toner_level,
            toner_capacity: config.toner_capacity,
            memory: config.memory.clone(),
            extra_oids: config.extra_oids.clone(),
        }
    }

    /// MAC address as raw octets. Malformed input yields an empty vector.
    pub fn mac_octets(&self) -> Vec<u8> {
        let cleaned: String = self
            .mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect();
        if cleaned.len() != 12 {
            return Vec::new();
        }
        hex::decode(cleaned).unwrap_or_default()
    }
}

/// UUIDv5 over serial and MAC so a device keeps its endpoint address across
/// restarts without it having to be configured.
pub fn derive_device_uuid(serial: &str, mac: &str) -> Uuid {
    let name = format!("devsim:{}:{}", serial, mac.to_ascii_lowercase());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn default_system_name() -> String {
    "HP LaserJet".to_string()
}

fn default_mac() -> String {
    "00:00:00:00:00:00".to_string()
}

fn default_serial() -> String {
    "UNKNOWN".to_string()
}

fn default_model() -> String {
    "HP LaserJet".to_string()
}

fn default_firmware() -> String {
    "1.0.0".to_string()
}

fn default_location() -> String {
    "Office".to_string()
}

fn default_contact() -> String {
    "Admin".to_string()
}

fn default_toner_level() -> u32 {
    100
}

fn default_toner_capacity() -> u32 {
    10000
}

fn default_memory() -> String {
    "64MB".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IdentityConfig {
        serde_yaml::from_str(
            r#"
hostname: HPLJ-4F2
ip: 10.0.0.40
serial: CNB8K12345
mac: "A0:B1:C2:D3:E4:F5"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let snapshot = IdentitySnapshot::from_config(&config());
        assert_eq!(snapshot.model, "HP LaserJet");
        assert_eq!(snapshot.toner_capacity, 10000);
        assert_eq!(snapshot.page_count, 0);
    }

    #[test]
    fn test_device_uuid_is_stable() {
        let a = IdentitySnapshot::from_config(&config());
        let b = IdentitySnapshot::from_config(&config());
        assert_eq!(a.device_uuid, b.device_uuid);

        let mut other = config();
        other.serial = "OTHER".to_string();
        assert_ne!(IdentitySnapshot::from_config(&other).device_uuid, a.device_uuid);
    }

    #[test]
    fn test_configured_uuid_wins() {
        let mut cfg = config();
        let fixed = Uuid::new_v4();
        cfg.uuid = Some(fixed);
        assert_eq!(IdentitySnapshot::from_config(&cfg).device_uuid, fixed);
    }

    #[test]
    fn test_mac_octets() {
        let snapshot = IdentitySnapshot::from_config(&config());
        assert_eq!(snapshot.mac_octets(), vec![0xA0, 0xB1, 0xC2, 0xD3, 0xE4, 0xF5]);

        let mut broken = snapshot.clone();
        broken.mac = "not-a-mac".to_string();
        assert!(broken.mac_octets().is_empty());
    }
}
