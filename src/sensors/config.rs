//! Loader for the sensors JSON file (§6 of the design document). This is the
//! one piece of C9 ("Sensor Configuration Loader") the distilled spec keeps
//! in scope: the file format, not the mechanism that triggers a reload.

use ipnetwork::IpNetwork;
use log::warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use crate::errors::ConfigError;
use crate::sensors::{HomeNet, Observation, Sensor, SensorsDb};

#[derive(Debug, Deserialize)]
struct RawHomeNet {
    network: String,
    network_name: String,
    netmask: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawObservation {
    #[serde(default)]
    home_nets: Vec<RawHomeNet>,
    #[serde(default)]
    routers_macs: Vec<String>,
    #[serde(default)]
    enrichment: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    span_port: bool,
    #[serde(default)]
    exporter_in_wan_side: bool,
    #[serde(default)]
    dns_client: bool,
    #[serde(default)]
    dns_target: bool,
    #[serde(default)]
    fallback_first_switch: i64,
}

#[derive(Debug, Deserialize, Default)]
struct RawSensor {
    #[serde(default)]
    observations_id: HashMap<String, RawObservation>,
}

type RawSensorsFile = HashMap<String, RawSensor>;

/// Renders a `serde_json::Map` as the comma-prefixed fragment the record
/// assembler appends verbatim, e.g. `,"pop":"par1","layer":"edge"`.
fn render_enrichment(map: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push(',');
        out.push('"');
        out.push_str(key);
        out.push_str("\":");
        out.push_str(&value.to_string());
    }
    out
}

fn parse_mac(s: &str) -> Result<u64, ConfigError> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(ConfigError::BadMac(s.to_string()));
    }
    let mut v: u64 = 0;
    for p in parts {
        let byte = u8::from_str_radix(p, 16).map_err(|_| ConfigError::BadMac(s.to_string()))?;
        v = (v << 8) | byte as u64;
    }
    Ok(v)
}

/// Builds the `label` network mask into a dotted-quad CIDR string (the
/// `network_ip` / "cidr-number" value), from separate network+netmask
/// strings as the JSON schema specifies.
fn home_net_label(network: &str, netmask: &str) -> Result<(IpNetwork, String), ConfigError> {
    let addr: Ipv4Addr = network.parse().map_err(|_| ConfigError::BadCidr(network.to_string()))?;
    let mask: Ipv4Addr = netmask.parse().map_err(|_| ConfigError::BadCidr(netmask.to_string()))?;
    let prefix = u32::from(mask).count_ones() as u8;
    let cidr = IpNetwork::new(IpAddr::V4(addr), prefix).map_err(|_| ConfigError::BadCidr(network.to_string()))?;
    Ok((cidr, format!("{}/{}", addr, prefix)))
}

fn build_observation(id: u32, raw: RawObservation) -> (Observation, Vec<u64>) {
    let mut obs = Observation::new(id);
    obs.span_port = raw.span_port;
    obs.exporter_in_wan_side = raw.exporter_in_wan_side;
    obs.want_client_dns = raw.dns_client;
    obs.want_target_dns = raw.dns_target;
    obs.fallback_first_switch = std::sync::atomic::AtomicI64::new(raw.fallback_first_switch);
    obs.enrichment = render_enrichment(&raw.enrichment);

    for hn in raw.home_nets {
        match home_net_label(&hn.network, &hn.netmask) {
            Ok((cidr, label)) => obs.home_nets.push(HomeNet { cidr, label, name: hn.network_name }),
            Err(e) => warn!("Skipping invalid home net {}/{}: {}", hn.network, hn.netmask, e),
        }
    }

    let mut macs = Vec::with_capacity(raw.routers_macs.len());
    for m in raw.routers_macs {
        match parse_mac(&m) {
            Ok(v) => macs.push(v),
            Err(e) => warn!("Skipping invalid router MAC {}: {}", m, e),
        }
    }

    (obs, macs)
}

pub fn parse(json: &str) -> Result<SensorsDb, ConfigError> {
    let raw: RawSensorsFile = serde_json::from_str(json).map_err(|source| ConfigError::Json {
        path: "<string>".into(),
        source,
    })?;

    let db = SensorsDb::new();
    for (cidr_str, raw_sensor) in raw {
        let cidr: IpNetwork = match cidr_str.parse() {
            Ok(c) => c,
            Err(_) => {
                warn!("Skipping sensor with invalid CIDR key {:?}", cidr_str);
                continue;
            }
        };

        let mut sensor = Sensor::new(cidr);
        for (obs_id_str, raw_obs) in raw_sensor.observations_id {
            let obs_id: u32 = match obs_id_str.parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!("Skipping observation with non-numeric id {:?} on sensor {}", obs_id_str, cidr_str);
                    continue;
                }
            };
            let (obs, macs) = build_observation(obs_id, raw_obs);
            sensor.router_macs.extend(macs);
            sensor.insert_observation(obs);
        }

        db.insert(sensor);
    }

    Ok(db)
}

pub fn load_from_file(path: &Path) -> Result<SensorsDb, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    parse(&content).map_err(|e| match e {
        ConfigError::Json { source, .. } => ConfigError::Json { path: path.to_path_buf(), source },
        other => other,
    })
}
