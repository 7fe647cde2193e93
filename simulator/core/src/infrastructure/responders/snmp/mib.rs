// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OID table derived from the identity snapshot.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Instant;

use super::ber::{Oid, Value};
use crate::domain::identity::{IdentitySnapshot, StaticValue};

const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";

#[derive(Debug, Clone)]
enum Entry {
    Static(Value),
    Uptime,
}

/// Read-only after construction; `sysUpTime` is the only computed entry.
#[derive(Debug)]
pub struct MibTable {
    entries: BTreeMap<Oid, Entry>,
    started: Instant,
}

impl MibTable {
    pub fn from_identity(identity: &IdentitySnapshot) -> Self {
        let text = |s: &str| Entry::Static(Value::OctetString(s.as_bytes().to_vec()));
        let int = |v: i64| Entry::Static(Value::Integer(v));
        let oid_value = |s: &str| match s.parse::<Oid>() {
            Ok(oid) => Entry::Static(Value::ObjectId(oid)),
            Err(_) => Entry::Static(Value::Null),
        };
        let page_count = i64::try_from(identity.page_count).unwrap_or(i64::MAX);

        let rows: Vec<(&str, Entry)> = vec![
            // system
            ("1.3.6.1.2.1.1.1.0", text(&format!("{} {}", identity.model, identity.firmware))),
            ("1.3.6.1.2.1.1.2.0", oid_value("1.3.6.1.4.1.11.2.3.9.1")),
            (SYS_UPTIME, Entry::Uptime),
            ("1.3.6.1.2.1.1.4.0", text(&identity.contact)),
            ("1.3.6.1.2.1.1.5.0", text(&identity.hostname)),
            ("1.3.6.1.2.1.1.6.0", text(&identity.location)),
            ("1.3.6.1.2.1.1.7.0", int(72)),
            // interfaces
            ("1.3.6.1.2.1.2.1.0", int(1)),
            ("1.3.6.1.2.1.2.2.1.1.1", int(1)),
            ("1.3.6.1.2.1.2.2.1.2.1", text("Ethernet")),
            ("1.3.6.1.2.1.2.2.1.3.1", int(6)),
            ("1.3.6.1.2.1.2.2.1.6.1", Entry::Static(Value::OctetString(identity.mac_octets()))),
            ("1.3.6.1.2.1.2.2.1.8.1", int(1)),
            // host resources: printer device
            ("1.3.6.1.2.1.25.3.2.1.2.1", text(&identity.model)),
            ("1.3.6.1.2.1.25.3.2.1.3.1", oid_value("1.3.6.1.2.1.25.3.1.5")),
            ("1.3.6.1.2.1.25.3.2.1.5.1", int(5)),
            ("1.3.6.1.2.1.25.3.5.1.1.1", int(1)),
            ("1.3.6.1.2.1.25.3.5.1.2.1", Entry::Static(Value::OctetString(vec![0, 0]))),
            // Printer-MIB
            ("1.3.6.1.2.1.43.5.1.1.1.1", int(5)),
            ("1.3.6.1.2.1.43.5.1.1.2.1", int(5)),
            ("1.3.6.1.2.1.43.5.1.1.3.1", int(1)),
            ("1.3.6.1.2.1.43.5.1.1.16.1", text(&identity.serial)),
            ("1.3.6.1.2.1.43.8.2.1.9.1.1", int(3)),
            ("1.3.6.1.2.1.43.9.2.1.2.1.1", int(0)),
            ("1.3.6.1.2.1.43.10.2.1.4.1.1", Entry::Static(Value::Counter32(clamp_u32(identity.page_count)))),
            ("1.3.6.1.2.1.43.10.2.1.5.1.1", int(600)),
            ("1.3.6.1.2.1.43.11.1.1.6.1.1", int(i64::from(identity.toner_level))),
            ("1.3.6.1.2.1.43.11.1.1.8.1.1", int(i64::from(identity.toner_capacity))),
            ("1.3.6.1.2.1.43.11.1.1.9.1.1", int(3)),
            // HP enterprise
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.1.3.3.0", text(&identity.model)),
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.1.3.6.0", text(&identity.serial)),
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.1.6.5.0", text(&identity.firmware)),
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.3.5.1.0", int(i64::from(identity.toner_level))),
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.4.1.2.1.0", int(page_count)),
            ("1.3.6.1.4.1.11.2.3.9.4.2.1.4.1.2.6.0", int(0)),
        ];

        let mut entries = BTreeMap::new();
        for (oid, entry) in rows {
            if let Ok(oid) = oid.parse::<Oid>() {
                entries.insert(oid, entry);
            }
        }

        for (oid, value) in &identity.extra_oids {
            let Ok(oid) = oid.parse::<Oid>() else {
                tracing::warn!(oid = %oid, "Ignoring malformed extra OID");
                continue;
            };
            let value = match value {
                StaticValue::Integer(v) => Value::Integer(*v),
                StaticValue::Text(s) => Value::OctetString(s.as_bytes().to_vec()),
            };
            entries.insert(oid, Entry::Static(value));
        }

        Self {
            entries,
            started: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, oid: &Oid) -> Option<Value> {
        self.entries.get(oid).map(|entry| self.resolve(entry))
    }

    /// First entry strictly after `oid` in OID order.
    pub fn next(&self, oid: &Oid) -> Option<(Oid, Value)> {
        self.entries
            .range((Bound::Excluded(oid), Bound::Unbounded))
            .next()
            .map(|(oid, entry)| (oid.clone(), self.resolve(entry)))
    }

    fn resolve(&self, entry: &Entry) -> Value {
        match entry {
            Entry::Static(value) => value.clone(),
            Entry::Uptime => {
                let centis = self.started.elapsed().as_millis() / 10;
                Value::TimeTicks((centis % (u128::from(u32::MAX) + 1)) as u32)
            }
        }
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityConfig;

    fn table() -> MibTable {
        let config: IdentityConfig = serde_yaml::from_str(
            r#"
hostname: HPLJ-4F2
ip: 10.0.0.40
serial: CNB8K12345
page_count: 18432
extra_oids:
  "1.3.6.1.4.1.99999.1.0": "custom"
  "1.3.6.1.2.1.1.6.0": "Basement"
"#,
        )
        .unwrap();
        MibTable::from_identity(&IdentitySnapshot::from_config(&config))
    }

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_identity_values() {
        let table = table();
        assert_eq!(
            table.get(&oid("1.3.6.1.2.1.1.5.0")),
            Some(Value::OctetString(b"HPLJ-4F2".to_vec()))
        );
        assert_eq!(
            table.get(&oid("1.3.6.1.2.1.43.10.2.1.4.1.1")),
            Some(Value::Counter32(18432))
        );
        assert!(matches!(table.get(&oid(SYS_UPTIME)), Some(Value::TimeTicks(_))));
        assert_eq!(table.get(&oid("1.3.6.1.2.1.1.99.0")), None);
    }

    #[test]
    fn test_extra_oids_add_and_override() {
        let table = table();
        assert_eq!(
            table.get(&oid("1.3.6.1.4.1.99999.1.0")),
            Some(Value::OctetString(b"custom".to_vec()))
        );
        assert_eq!(
            table.get(&oid("1.3.6.1.2.1.1.6.0")),
            Some(Value::OctetString(b"Basement".to_vec()))
        );
    }

    #[test]
    fn test_next_walks_in_oid_order() {
        let table = table();
        let (first, _) = table.next(&oid("1.3.6.1.2.1.1")).unwrap();
        assert_eq!(first.to_string(), "1.3.6.1.2.1.1.1.0");
        let (second, _) = table.next(&first).unwrap();
        assert_eq!(second.to_string(), "1.3.6.1.2.1.1.2.0");

        let mut cursor = oid("0.0");
        let mut walked = 0;
        while let Some((next, _)) = table.next(&cursor) {
            assert!(next > cursor);
            cursor = next;
            walked += 1;
        }
        assert_eq!(walked, table.len());
        assert!(table.next(&oid("1.3.6.1.4.1.99999.1.0")).is_none());
    }
}
