//! The sensors database (C9's in-memory counterpart): sensor -> observation ->
//! template table, plus the scoped lookup tables an observation accumulates
//! from option templates.
//!
//! Grounded on `Bigomby/f2k`'s `src/sensors/` headers: `network_ip` /
//! `network_name` / `is_exporter_in_wan_side` / `is_span_observation_id` all
//! take an `observation_id_t*` there, not a `sensor_t*`, even though the
//! distilled home_nets/enrichment/span-mode prose in §3 reads sensor-first.
//! Router MACs are the one exception the original keeps sensor-scoped
//! (`sensor_has_router_mac`). See DESIGN.md for the write-up of this choice.

pub mod config;

use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, RwLock};

use crate::wire::template::Template;

#[derive(Debug, Clone)]
pub struct HomeNet {
    pub cidr: IpNetwork,
    /// The "cidr-number" label returned by `network_ip`, e.g. `"192.168.0.0/16"`.
    pub label: String,
    /// The operator-assigned name returned by `network_name`.
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
}

/// A sub-scope within a sensor: NetFlow v9 source-id / IPFIX observation
/// domain id. Created on-demand when a template first references an unknown
/// id (with defaults: no home nets, DNS resolution off); pre-populated for
/// ids present in the sensors JSON at load time.
pub struct Observation {
    pub id: u32,
    pub home_nets: Vec<HomeNet>,
    pub span_port: bool,
    pub exporter_in_wan_side: bool,
    pub want_client_dns: bool,
    pub want_target_dns: bool,
    pub fallback_first_switch: AtomicI64,
    /// Comma-prefixed JSON fragment merged verbatim into every emitted line,
    /// e.g. `,"pop":"par1","layer":"edge"`.
    pub enrichment: String,

    pub templates: RwLock<HashMap<u16, Arc<Template>>>,
    pub applications: RwLock<HashMap<u64, String>>,
    pub selectors: RwLock<HashMap<u64, String>>,
    pub interfaces: RwLock<HashMap<u64, InterfaceInfo>>,
}

impl Observation {
    pub fn new(id: u32) -> Self {
        Observation {
            id,
            home_nets: Vec::new(),
            span_port: false,
            exporter_in_wan_side: false,
            want_client_dns: false,
            want_target_dns: false,
            fallback_first_switch: AtomicI64::new(0),
            enrichment: String::new(),
            templates: RwLock::new(HashMap::new()),
            applications: RwLock::new(HashMap::new()),
            selectors: RwLock::new(HashMap::new()),
            interfaces: RwLock::new(HashMap::new()),
        }
    }

    /// `network_ip(obs, ip) -> "cidr-number" | none`
    pub fn network_ip(&self, ip: IpAddr) -> Option<&str> {
        self.home_nets.iter().find(|n| n.cidr.contains(ip)).map(|n| n.label.as_str())
    }

    /// `network_name(obs, ip) -> "name" | none`
    pub fn network_name(&self, ip: IpAddr) -> Option<&str> {
        self.home_nets.iter().find(|n| n.cidr.contains(ip)).map(|n| n.name.as_str())
    }

    pub fn ip_in_home_nets(&self, ip: IpAddr) -> bool {
        self.home_nets.iter().any(|n| n.cidr.contains(ip))
    }

    pub fn lookup_template(&self, id: u16) -> Option<Arc<Template>> {
        self.templates.read().unwrap().get(&id).cloned()
    }

    pub fn upsert_template(&self, id: u16, template: Arc<Template>) {
        self.templates.write().unwrap().insert(id, template);
    }

    /// A snapshot of every template currently known for this observation,
    /// for the periodic on-disk dump (§8's persistence story).
    pub fn templates_snapshot(&self) -> Vec<(u16, Arc<Template>)> {
        self.templates.read().unwrap().iter().map(|(id, t)| (*id, t.clone())).collect()
    }

    pub fn application_name(&self, id: u64) -> Option<String> {
        self.applications.read().unwrap().get(&id).cloned()
    }

    pub fn add_application(&self, id: u64, name: String) {
        self.applications.write().unwrap().insert(id, name);
    }

    pub fn selector_name(&self, id: u64) -> Option<String> {
        self.selectors.read().unwrap().get(&id).cloned()
    }

    pub fn add_selector(&self, id: u64, name: String) {
        self.selectors.write().unwrap().insert(id, name);
    }

    pub fn interface_name(&self, id: u64) -> Option<String> {
        self.interfaces.read().unwrap().get(&id).map(|i| i.name.clone())
    }

    pub fn add_interface(&self, id: u64, name: String, description: String) {
        self.interfaces.write().unwrap().insert(id, InterfaceInfo { name, description });
    }
}

/// A single exporting device. The sensors JSON keys sensors by CIDR rather
/// than a single address (an exporter behind an elastic/floating IP still
/// needs one identity), so matching a datagram's source address means
/// testing containment, not an exact lookup.
pub struct Sensor {
    pub cidr: IpNetwork,
    pub router_macs: std::collections::HashSet<u64>,
    observations: RwLock<HashMap<u32, Arc<Observation>>>,
}

impl Sensor {
    pub fn new(cidr: IpNetwork) -> Self {
        Sensor {
            cidr,
            router_macs: std::collections::HashSet::new(),
            observations: RwLock::new(HashMap::new()),
        }
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        self.cidr.contains(ip)
    }

    pub fn is_router_mac(&self, mac: u64) -> bool {
        self.router_macs.contains(&mac)
    }

    /// Returns the existing observation or creates a default one and
    /// registers it — the on-demand creation the distilled spec describes
    /// for ids the sensors JSON never mentioned.
    pub fn get_or_create_observation(&self, id: u32) -> Arc<Observation> {
        if let Some(obs) = self.observations.read().unwrap().get(&id) {
            return obs.clone();
        }
        let mut write = self.observations.write().unwrap();
        write.entry(id).or_insert_with(|| Arc::new(Observation::new(id))).clone()
    }

    pub fn get_observation(&self, id: u32) -> Option<Arc<Observation>> {
        self.observations.read().unwrap().get(&id).cloned()
    }

    pub fn insert_observation(&self, obs: Observation) {
        self.observations.write().unwrap().insert(obs.id, Arc::new(obs));
    }

    pub fn observation_ids(&self) -> Vec<u32> {
        self.observations.read().unwrap().keys().cloned().collect()
    }
}

/// The whole sensor population. Shared read-mostly across workers; sensors
/// are added at load time (or replaced wholesale by a reload) and otherwise
/// immutable for the life of the process.
pub struct SensorsDb {
    sensors: RwLock<Vec<Arc<Sensor>>>,
}

impl SensorsDb {
    pub fn new() -> Self {
        SensorsDb { sensors: RwLock::new(Vec::new()) }
    }

    /// Finds the sensor whose CIDR contains `addr`. First match wins; the
    /// loader rejects overlapping CIDRs so in practice at most one matches.
    pub fn get(&self, addr: IpAddr) -> Option<Arc<Sensor>> {
        self.sensors.read().unwrap().iter().find(|s| s.matches(addr)).cloned()
    }

    pub fn insert(&self, sensor: Sensor) {
        self.sensors.write().unwrap().push(Arc::new(sensor));
    }

    /// A snapshot of every sensor currently loaded, for the periodic
    /// template dump which has to walk the whole population.
    pub fn all(&self) -> Vec<Arc<Sensor>> {
        self.sensors.read().unwrap().clone()
    }

    /// Replaces the whole sensor population in one shot (used by a reload).
    pub fn replace_all(&self, sensors: Vec<Sensor>) {
        let mut write = self.sensors.write().unwrap();
        *write = sensors.into_iter().map(Arc::new).collect();
    }

    pub fn len(&self) -> usize {
        self.sensors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SensorsDb {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn mac_as_u64(bytes: &[u8; 6]) -> u64 {
    let mut v = 0u64;
    for b in bytes {
        v = (v << 8) | (*b as u64);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn observation_network_lookup() {
        let mut obs = Observation::new(1);
        obs.home_nets.push(HomeNet {
            cidr: "192.168.0.0/16".parse().unwrap(),
            label: "192.168.0.0/16".to_string(),
            name: "corp-lan".to_string(),
        });

        let inside: IpAddr = Ipv4Addr::new(192, 168, 1, 5).into();
        let outside: IpAddr = Ipv4Addr::new(8, 8, 8, 8).into();

        assert_eq!(obs.network_ip(inside), Some("192.168.0.0/16"));
        assert_eq!(obs.network_name(inside), Some("corp-lan"));
        assert_eq!(obs.network_ip(outside), None);
    }

    #[test]
    fn sensor_creates_observation_on_demand() {
        let sensor = Sensor::new("10.0.0.1/32".parse().unwrap());
        assert!(sensor.get_observation(256).is_none());

        let obs = sensor.get_or_create_observation(256);
        assert_eq!(obs.id, 256);
        assert!(sensor.get_observation(256).is_some());

        // idempotent
        let again = sensor.get_or_create_observation(256);
        assert!(Arc::ptr_eq(&obs, &again));
    }

    #[test]
    fn sensors_db_matches_by_cidr() {
        let db = SensorsDb::new();
        db.insert(Sensor::new("10.0.0.0/24".parse().unwrap()));

        let inside: IpAddr = Ipv4Addr::new(10, 0, 0, 42).into();
        let outside: IpAddr = Ipv4Addr::new(10, 0, 1, 1).into();

        assert!(db.get(inside).is_some());
        assert!(db.get(outside).is_none());
    }

    #[test]
    fn mac_as_u64_roundtrip() {
        let bytes = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        assert_eq!(mac_as_u64(&bytes), 0xaabbccddeeff);
    }
}
