//! The Record Assembler (C7): turns one decoded data (or option data)
//! record into either an output JSON line or a write into the Observation's
//! option lookup tables, per SPEC_FULL.md §4.7.
//!
//! Regular records walk the template's fields in order, invoking the field
//! dictionary's handler for each one and concatenating whatever fragment it
//! appended; after the walk, direction/client/target/DNS/country-code are
//! computed once as assembler-level finals rather than individually
//! dictionary-dispatched fields (see DESIGN.md — grounded on Testable
//! Property #3, which treats direction, client_mac, client_name and
//! target_name as one mutually-consistent group).

use log::warn;

use crate::context::Context;
use crate::flow_cache::{Direction, FlowCache};
use crate::metrics::Metrics;
use crate::sensors::{Observation, Sensor};
use crate::wire::dictionary::{self, HandlerKind};
use crate::wire::handlers::{self, HandlerArgs};
use crate::wire::template::Template;
use crate::wire::{read_variable_length, VERSION_IPFIX, VERSION_V5, VERSION_V9};

pub fn type_label(version: u16) -> &'static str {
    match version {
        VERSION_V5 => "netflowv5",
        VERSION_V9 => "netflowv9",
        VERSION_IPFIX => "ipfix",
        _ => "unknown",
    }
}

/// Slices one field's bytes out of `record_bytes` starting at `offset`,
/// resolving a variable-length prefix when the template says the field is
/// variable. Returns `(bytes, bytes_consumed_including_any_prefix)`.
fn take_field<'a>(field_length: u16, record_bytes: &'a [u8], offset: usize) -> Result<(&'a [u8], usize), String> {
    let (len, prefix) = if field_length == Template::VARIABLE_LENGTH {
        read_variable_length(&record_bytes[offset..])?
    } else {
        (field_length as usize, 0)
    };

    let start = offset + prefix;
    let end = start
        .checked_add(len)
        .ok_or_else(|| "field length overflow".to_string())?;
    if end > record_bytes.len() {
        return Err(format!("record truncated: needed {} bytes at offset {} but only {} available", len, start, record_bytes.len()));
    }
    Ok((&record_bytes[start..end], end - offset))
}

/// Decodes one regular data record against `template` and returns the
/// finished JSON line plus the number of bytes of `record_bytes` it
/// consumed (so the caller can advance to the next record in the same data
/// flowset — records aren't fixed-size once a variable-length field is
/// involved).
pub fn assemble_data_record(
    version: u16,
    export_time_secs: u32,
    template: &Template,
    record_bytes: &[u8],
    sensor: &Sensor,
    observation: &Observation,
    ctx: &Context,
) -> Result<(String, usize), String> {
    let mut cache = FlowCache::new();
    let mut line = String::with_capacity(256);
    line.push('{');
    line.push_str("\"type\":\"");
    line.push_str(type_label(version));
    line.push_str("\",\"timestamp\":");
    line.push_str(&export_time_secs.to_string());

    let mut offset = 0usize;
    let mut src_country_from_wire = false;
    let mut dst_country_from_wire = false;

    for field in &template.fields {
        let (bytes, consumed) = take_field(field.length, record_bytes, offset)?;
        offset += consumed;

        let spec = match dictionary::lookup(field.enterprise, field.field_id) {
            Some(spec) => spec,
            None => continue,
        };

        let mut fragment = String::new();
        let mut args = HandlerArgs { bytes, cache: &mut cache, sensor, observation, ctx, out: &mut fragment };
        let written = handlers::dispatch(spec.handler, spec.key, &mut args);

        if written > 0 {
            line.push(',');
            line.push_str(&fragment);
            match spec.key {
                "src_country_code" => src_country_from_wire = true,
                "dst_country_code" => dst_country_from_wire = true,
                _ => {}
            }
        }
    }

    cache.infer_direction(|mac| sensor.is_router_mac(mac), observation.span_port, |ip| observation.ip_in_home_nets(ip));

    if cache.direction() != Direction::Unset {
        line.push_str(",\"direction\":\"");
        line.push_str(cache.direction().as_str());
        line.push('"');
    }

    if let (Some(mac), true) = (cache.client_mac(), cache.take_client_mac_print_slot()) {
        let rendered = crate::enrichment::mac_db::render_mac(crate::sensors::mac_as_u64(&mac), mac, &ctx.mac_name_db, &ctx.mac_vendor_db);
        line.push_str(",\"client_mac\":\"");
        line.push_str(&rendered);
        line.push('"');
    }

    if observation.want_client_dns {
        if let Some(ip) = cache.client_ip() {
            match ctx.ptr_requester.resolve(ip, ctx.ptr_deadline) {
                Some(name) => {
                    line.push_str(",\"client_name\":\"");
                    line.push_str(&name);
                    line.push('"');
                }
                None => Metrics::incr(&ctx.metrics.ptr_deadline_misses),
            }
        }
    }

    if observation.want_target_dns {
        if let Some(ip) = cache.target_ip() {
            match ctx.ptr_requester.resolve(ip, ctx.ptr_deadline) {
                Some(name) => {
                    line.push_str(",\"target_name\":\"");
                    line.push_str(&name);
                    line.push('"');
                }
                None => Metrics::incr(&ctx.metrics.ptr_deadline_misses),
            }
        }
    }

    // The wire carries an explicit country-code field only for sensors
    // whose exporter firmware tags it (see the NTOP_PEN dictionary
    // entries); everyone else falls back to the local GeoIP source keyed
    // on the addresses already decoded above.
    if !src_country_from_wire {
        if let Some(ip) = cache.src_ip() {
            if let Some(code) = ctx.geoip.country_code(ip) {
                line.push_str(",\"src_country_code\":\"");
                line.push_str(code);
                line.push('"');
            }
        }
    }
    if !dst_country_from_wire {
        if let Some(ip) = cache.dst_ip() {
            if let Some(code) = ctx.geoip.country_code(ip) {
                line.push_str(",\"dst_country_code\":\"");
                line.push_str(code);
                line.push('"');
            }
        }
    }

    line.push_str(&observation.enrichment);
    line.push('}');

    Ok((line, offset))
}

/// Decodes one option data record: writes id→name pairs into the
/// Observation's lookup tables instead of emitting output. The first
/// `scope_field_count` fields are the scope (the id); any later field whose
/// id the dictionary recognises as an option name field (§`dictionary::
/// option_handler_for`) supplies the name for the most recently read scope
/// id. Returns the number of bytes consumed, same contract as
/// [`assemble_data_record`].
pub fn process_option_record(template: &Template, record_bytes: &[u8], observation: &Observation) -> Result<usize, String> {
    let mut offset = 0usize;
    let mut scope_id: Option<u64> = None;

    for (idx, field) in template.fields.iter().enumerate() {
        let (bytes, consumed) = take_field(field.length, record_bytes, offset)?;
        offset += consumed;

        if idx < template.scope_field_count as usize {
            scope_id = Some(handlers::be_u64(bytes));
            continue;
        }

        if let (Some(kind), Some(id)) = (dictionary::option_handler_for(field.field_id), scope_id) {
            let name = handlers::decode_string(bytes);
            match kind {
                HandlerKind::OptionApplicationName => observation.add_application(id, name),
                HandlerKind::OptionSelectorName => observation.add_selector(id, name),
                HandlerKind::OptionInterfaceName => observation.add_interface(id, name, String::new()),
                _ => warn!("option_handler_for returned a non-option handler kind for field {}", field.field_id),
            }
        }
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::geoip::NullGeoIp;
    use crate::enrichment::mac_db::{MacNameDb, MacVendorDb};
    use crate::enrichment::ptr_cache::PtrCache;
    use crate::enrichment::ptr_resolver;
    use crate::wire::template::TemplateField;
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
            output: Arc::new(crate::output::ChannelOutputSink::stdout(1)),
            metrics: Arc::new(Metrics::default()),
        }
    }

    fn simple_template() -> Template {
        let fields = vec![
            TemplateField { enterprise: 0, field_id: 8, length: 4 },  // src
            TemplateField { enterprise: 0, field_id: 12, length: 4 }, // dst
            TemplateField { enterprise: 0, field_id: 1, length: 8 },  // bytes
            TemplateField { enterprise: 0, field_id: 2, length: 8 },  // pkts
            TemplateField { enterprise: 0, field_id: 4, length: 1 },  // l4_proto
        ];
        let fixed_length = fields.iter().map(|f| f.length as usize).sum();
        Template { id: 256, scope_field_count: 0, fields, fixed_length }
    }

    #[test]
    fn assembles_a_regular_record_and_infers_direction_from_home_net() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let mut observation = Observation::new(256);
        observation.home_nets.push(crate::sensors::HomeNet {
            cidr: "192.168.0.0/16".parse().unwrap(),
            label: "192.168.0.0/16".to_string(),
            name: "corp-lan".to_string(),
        });

        let template = simple_template();
        let mut record = Vec::new();
        record.extend_from_slice(&[192, 168, 1, 1]); // src, inside home net
        record.extend_from_slice(&[8, 8, 8, 8]); // dst, outside
        record.extend_from_slice(&1000u64.to_be_bytes()); // bytes
        record.extend_from_slice(&10u64.to_be_bytes()); // pkts
        record.push(6); // tcp

        let (line, consumed) = assemble_data_record(9, 1_700_000_000, &template, &record, &sensor, &observation, &ctx).unwrap();

        assert_eq!(consumed, record.len());
        assert!(line.contains("\"type\":\"netflowv9\""));
        assert!(line.contains("\"src\":\"192.168.1.1\""));
        assert!(line.contains("\"dst\":\"8.8.8.8\""));
        assert!(line.contains("\"bytes\":1000"));
        assert!(line.contains("\"l4_proto\":\"tcp\""));
        assert!(line.contains("\"direction\":\"egress\""));
        assert!(line.ends_with('}'));
    }

    #[test]
    fn truncated_record_is_rejected() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let observation = Observation::new(256);
        let template = simple_template();
        let short = vec![0u8; 4];

        assert!(assemble_data_record(9, 0, &template, &short, &sensor, &observation, &ctx).is_err());
    }

    #[test]
    fn enrichment_suffix_appears_exactly_once() {
        let ctx = test_context();
        let sensor = Sensor::new("10.0.0.0/24".parse::<IpNetwork>().unwrap());
        let mut observation = Observation::new(256);
        observation.enrichment = ",\"pop\":\"par1\"".to_string();

        let template = simple_template();
        let mut record = vec![1, 1, 1, 1, 2, 2, 2, 2];
        record.extend_from_slice(&0u64.to_be_bytes());
        record.extend_from_slice(&0u64.to_be_bytes());
        record.push(17);

        let (line, _) = assemble_data_record(9, 0, &template, &record, &sensor, &observation, &ctx).unwrap();
        assert_eq!(line.matches("\"pop\":\"par1\"").count(), 1);
    }

    #[test]
    fn option_record_populates_application_table() {
        let observation = Observation::new(256);
        let fields = vec![
            TemplateField { enterprise: 0, field_id: 95, length: 4 }, // scope: applicationId
            TemplateField { enterprise: 0, field_id: 96, length: 8 }, // name string
        ];
        let fixed_length = fields.iter().map(|f| f.length as usize).sum();
        let template = Template { id: 300, scope_field_count: 1, fields, fixed_length };

        let mut record = Vec::new();
        record.extend_from_slice(&42u32.to_be_bytes());
        record.extend_from_slice(b"ssh\0\0\0\0\0");

        let consumed = process_option_record(&template, &record, &observation).unwrap();
        assert_eq!(consumed, record.len());
        assert_eq!(observation.application_name(42), Some("ssh".to_string()));
    }
}
