//! Field handlers (C5): one function per `HandlerKind`, dispatched by a
//! `match` per §9 ("Dynamic dispatch... a tagged variant... dispatch is a
//! match on the variant tag"). Each handler receives the already-sliced wire
//! bytes for its field and a [`HandlerArgs`] bundle, appends its rendered
//! `"key":value` fragment (no leading comma — the assembler owns that) to
//! `args.out`, and returns the number of bytes appended (0 ⇒ suppress,
//! matching the handler contract in SPEC_FULL.md §4.3/§4.7).
//!
//! Handlers that only mutate the Flow Cache (`SaveDirection`,
//! `SaveSamplingInterval`) always return 0.

use std::convert::TryInto;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::context::Context;
use crate::enrichment::mac_db::render_mac;
use crate::enrichment::proto;
use crate::flow_cache::FlowCache;
use crate::sensors::{mac_as_u64, Observation, Sensor};
use crate::wire::dictionary::HandlerKind;

pub struct HandlerArgs<'a> {
    pub bytes: &'a [u8],
    pub cache: &'a mut FlowCache,
    pub sensor: &'a Sensor,
    pub observation: &'a Observation,
    pub ctx: &'a Context,
    pub out: &'a mut String,
}

pub(crate) fn be_u64(bytes: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for b in bytes.iter().take(8) {
        v = (v << 8) | (*b as u64);
    }
    v
}

fn push_number(out: &mut String, key: &str, value: u64) -> usize {
    let before = out.len();
    let _ = write!(out, "\"{}\":{}", key, value);
    out.len() - before
}

fn push_quoted(out: &mut String, key: &str, value: &str) -> usize {
    let before = out.len();
    out.push('"');
    out.push_str(key);
    out.push_str("\":\"");
    out.push_str(value);
    out.push('"');
    out.len() - before
}

/// Copies raw bytes up to the first NUL, escaping embedded double quotes to
/// single quotes per §4.3's JSON-safety rule.
pub(crate) fn decode_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).replace('"', "'")
}

fn mac_from_bytes(bytes: &[u8]) -> Option<[u8; 6]> {
    bytes.get(0..6)?.try_into().ok()
}

fn flow_end_reason(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("idle timeout"),
        2 => Some("active timeout"),
        3 => Some("end of flow"),
        4 => Some("forced end"),
        5 => Some("lack of resources"),
        _ => None,
    }
}

fn biflow_direction(code: u8) -> &'static str {
    match code {
        1 => "initiator",
        2 => "reverse initiator",
        _ => "unknown",
    }
}

pub fn dispatch(kind: HandlerKind, key: &str, args: &mut HandlerArgs) -> usize {
    match kind {
        HandlerKind::PrintNumber => {
            let mut value = be_u64(args.bytes);
            if (key == "bytes" || key == "pkts") && args.cache.sampling_interval.unwrap_or(1) > 1 {
                value = value.saturating_mul(args.cache.sampling_interval.unwrap() as u64);
            }
            push_number(args.out, key, value)
        }

        HandlerKind::PrintString => push_quoted(args.out, key, &decode_string(args.bytes)),

        HandlerKind::PrintSrcIpv4Addr => {
            if let Ok(octets) = args.bytes.try_into() {
                let addr = Ipv4Addr::from(octets);
                args.cache.save_ipv4_src(addr);
                push_quoted(args.out, key, &addr.to_string())
            } else {
                0
            }
        }
        HandlerKind::PrintDstIpv4Addr => {
            if let Ok(octets) = args.bytes.try_into() {
                let addr = Ipv4Addr::from(octets);
                args.cache.save_ipv4_dst(addr);
                push_quoted(args.out, key, &addr.to_string())
            } else {
                0
            }
        }
        HandlerKind::PrintSrcIpv6Addr => {
            if let Ok(octets) = args.bytes.try_into() {
                let addr = Ipv6Addr::from(octets);
                args.cache.save_ipv6_src(addr);
                push_quoted(args.out, key, &addr.to_string())
            } else {
                0
            }
        }
        HandlerKind::PrintDstIpv6Addr => {
            if let Ok(octets) = args.bytes.try_into() {
                let addr = Ipv6Addr::from(octets);
                args.cache.save_ipv6_dst(addr);
                push_quoted(args.out, key, &addr.to_string())
            } else {
                0
            }
        }

        HandlerKind::PrintSrcMac => print_mac(args, key, |c, m| c.src_mac = Some(m)),
        HandlerKind::PrintDstMac => print_mac(args, key, |c, m| c.dst_mac = Some(m)),
        HandlerKind::PrintPostSrcMac => print_mac(args, key, |c, m| c.post_src_mac = Some(m)),
        HandlerKind::PrintPostDstMac => print_mac(args, key, |c, m| c.post_dst_mac = Some(m)),

        HandlerKind::PrintSrcPort => {
            if let Ok(b) = args.bytes.try_into() {
                let port = u16::from_be_bytes(b);
                args.cache.src_port = Some(port);
                push_number(args.out, key, port as u64)
            } else {
                0
            }
        }
        HandlerKind::PrintDstPort => {
            if let Ok(b) = args.bytes.try_into() {
                let port = u16::from_be_bytes(b);
                args.cache.dst_port = Some(port);
                push_number(args.out, key, port as u64)
            } else {
                0
            }
        }

        HandlerKind::SaveDirection => {
            if let Some(&b) = args.bytes.first() {
                args.cache.save_explicit_direction(b == 0);
            }
            0
        }

        HandlerKind::PrintProtoName => {
            let code = args.bytes.first().copied().unwrap_or(0);
            let name = proto::name(code).map(str::to_string).unwrap_or_else(|| code.to_string());
            push_quoted(args.out, key, &name)
        }

        HandlerKind::PrintEngineId => push_quoted(args.out, key, &be_u64(args.bytes).to_string()),

        HandlerKind::PrintApplicationId => {
            let id = be_u64(args.bytes);
            if id == 0 {
                return 0;
            }
            let name = args
                .observation
                .application_name(id)
                .unwrap_or_else(|| format!("{}:{}", (id >> 24) & 0xff, id & 0x00ff_ffff));
            push_quoted(args.out, key, &name)
        }

        HandlerKind::PrintFlowEndReason => {
            let code = args.bytes.first().copied().unwrap_or(0);
            match flow_end_reason(code) {
                Some(reason) => push_quoted(args.out, key, reason),
                None => 0,
            }
        }

        HandlerKind::PrintBiflowDirection => {
            let code = args.bytes.first().copied().unwrap_or(0);
            push_quoted(args.out, key, biflow_direction(code))
        }

        HandlerKind::PrintSrcNet => {
            let ip = args.cache.src_ip();
            print_net(args, "src_net", "src_net_name", ip)
        }
        HandlerKind::PrintDstNet => {
            let ip = args.cache.dst_ip();
            print_net(args, "dst_net", "dst_net_name", ip)
        }

        HandlerKind::PrintCountryCode => push_quoted(args.out, key, &decode_string(args.bytes)),

        HandlerKind::PrintAs => push_number(args.out, key, be_u64(args.bytes)),

        HandlerKind::PrintHttpUrl | HandlerKind::PrintHttpHost | HandlerKind::PrintHttpUserAgent | HandlerKind::PrintHttpReferer | HandlerKind::PrintHttpsCn => {
            push_quoted(args.out, key, &decode_string(args.bytes))
        }

        HandlerKind::SaveSamplingInterval => {
            if let Ok(b) = args.bytes.try_into() {
                args.cache.sampling_interval = Some(u32::from_be_bytes(b));
            }
            0
        }

        // Option-template id->name pairs are assembled from the scope field
        // plus this field's raw string by the record assembler's dedicated
        // option-record path (crate::assembler::process_option_record),
        // which writes into the Observation's lookup tables directly rather
        // than through this generic dispatch. Reaching here means the field
        // appeared outside an option record; nothing to emit.
        HandlerKind::OptionApplicationName | HandlerKind::OptionSelectorName | HandlerKind::OptionInterfaceName => 0,
    }
}

fn print_mac(args: &mut HandlerArgs, key: &str, save: impl FnOnce(&mut FlowCache, [u8; 6])) -> usize {
    match mac_from_bytes(args.bytes) {
        Some(bytes) => {
            save(args.cache, bytes);
            let mac = mac_as_u64(&bytes);
            let rendered = render_mac(mac, bytes, &args.ctx.mac_name_db, &args.ctx.mac_vendor_db);
            push_quoted(args.out, key, &rendered)
        }
        None => 0,
    }
}

fn print_net(args: &mut HandlerArgs, net_key: &str, name_key: &str, ip: Option<std::net::IpAddr>) -> usize {
    let ip = match ip {
        Some(ip) => ip,
        None => return 0,
    };
    let net = args.observation.network_ip(ip);
    let name = args.observation.network_name(ip);

    if net.is_none() && name.is_none() {
        return 0;
    }

    let before = args.out.len();
    let mut wrote_any = false;
    if let Some(net) = net {
        push_quoted(args.out, net_key, net);
        wrote_any = true;
    }
    if let Some(name) = name {
        if wrote_any {
            args.out.push(',');
        }
        push_quoted(args.out, name_key, name);
    }
    args.out.len() - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::geoip::NullGeoIp;
    use crate::enrichment::mac_db::{MacNameDb, MacVendorDb};
    use crate::enrichment::ptr_cache::PtrCache;
    use crate::enrichment::ptr_resolver;
    use crate::metrics::Metrics;
    use crate::output::ChannelOutputSink;
    use crate::sensors::Sensor;
    use ipnetwork::IpNetwork;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_context() -> Context {
        Context {
            mac_vendor_db: Arc::new(MacVendorDb::new()),
            mac_name_db: Arc::new(MacNameDb::new()),
            geoip: Arc::new(NullGeoIp),
            ptr_cache: Arc::new(PtrCache::new(Duration::from_secs(1), Duration::from_secs(1))),
            ptr_requester: ptr_resolver::spawn(Arc::new(PtrCache::new(Duration::from_secs(1), Duration::from_secs(1))), None),
            ptr_deadline: Duration::from_millis(1),
            output: Arc::new(ChannelOutputSink::stdout(1)),
            metrics: Arc::new(Metrics::default()),
        }
    }

    #[test]
    fn print_src_ipv4_addr_saves_and_renders() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(0);
        let mut cache = FlowCache::new();
        let mut out = String::new();
        let bytes = [192, 168, 1, 1];

        let mut args = HandlerArgs { bytes: &bytes, cache: &mut cache, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out };
        let n = dispatch(HandlerKind::PrintSrcIpv4Addr, "src", &mut args);

        assert!(n > 0);
        assert_eq!(out, "\"src\":\"192.168.1.1\"");
        assert_eq!(cache.src_ip(), Some(Ipv4Addr::new(192, 168, 1, 1).into()));
    }

    #[test]
    fn print_number_applies_sampling_interval_to_bytes_and_pkts() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(0);
        let mut cache = FlowCache::new();
        cache.sampling_interval = Some(10);
        let mut out = String::new();
        let bytes = 100u64.to_be_bytes();

        let mut args = HandlerArgs { bytes: &bytes, cache: &mut cache, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out };
        dispatch(HandlerKind::PrintNumber, "bytes", &mut args);

        assert_eq!(out, "\"bytes\":1000");
    }

    #[test]
    fn save_direction_sets_explicit_direction() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(0);
        let mut cache = FlowCache::new();
        let mut out = String::new();
        let bytes = [0u8];

        let mut args = HandlerArgs { bytes: &bytes, cache: &mut cache, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out };
        let n = dispatch(HandlerKind::SaveDirection, "", &mut args);

        assert_eq!(n, 0);
        assert_eq!(cache.direction(), crate::flow_cache::Direction::Ingress);
    }

    #[test]
    fn proto_name_falls_back_to_decimal() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(0);
        let mut cache = FlowCache::new();
        let mut out = String::new();
        let bytes = [253u8];

        let mut args = HandlerArgs { bytes: &bytes, cache: &mut cache, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out };
        dispatch(HandlerKind::PrintProtoName, "l4_proto", &mut args);

        assert_eq!(out, "\"l4_proto\":\"253\"");
    }

    #[test]
    fn handler_purity_same_inputs_yield_same_output() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(0);
        let bytes = [10, 0, 0, 1];

        let mut cache_a = FlowCache::new();
        let mut out_a = String::new();
        let mut args_a = HandlerArgs { bytes: &bytes, cache: &mut cache_a, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out_a };
        let n_a = dispatch(HandlerKind::PrintDstIpv4Addr, "dst", &mut args_a);

        let mut cache_b = FlowCache::new();
        let mut out_b = String::new();
        let mut args_b = HandlerArgs { bytes: &bytes, cache: &mut cache_b, sensor: &sensor, observation: &observation, ctx: &ctx, out: &mut out_b };
        let n_b = dispatch(HandlerKind::PrintDstIpv4Addr, "dst", &mut args_b);

        assert_eq!(n_a, n_b);
        assert_eq!(out_a, out_b);
        assert_eq!(cache_a.dst_ip(), cache_b.dst_ip());
    }
}
