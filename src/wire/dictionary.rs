//! The field dictionary (C3): a static table mapping `(enterprise, field
//! id)` to a JSON key, expected wire length, and a handler tag. Field
//! numbers below are the IANA IPFIX Information Elements also enumerated in
//! `flow::ipfix::FieldType`; this table is keyed by the raw numbers instead
//! of that closed enum because an enterprise (PEN) field is only knowable
//! at runtime.
//!
//! `HandlerKind` intentionally collapses the spec's generic `print-mac` /
//! `print-ipv4-addr` / `print-port` dictionary kinds into src/dst-specific
//! variants (`PrintSrcMac` vs `PrintDstMac`, etc.): a handler has to know
//! which `FlowCache` slot to write into, and giving each role its own tag
//! avoids a second match on the field id inside the handler body. See
//! DESIGN.md for the write-up.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub enterprise: u32,
    pub field_id: u16,
}

impl FieldKey {
    pub const fn new(enterprise: u32, field_id: u16) -> Self {
        FieldKey { enterprise, field_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLength {
    Fixed(u16),
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    PrintNumber,
    PrintString,
    PrintSrcIpv4Addr,
    PrintDstIpv4Addr,
    PrintSrcIpv6Addr,
    PrintDstIpv6Addr,
    PrintSrcMac,
    PrintDstMac,
    PrintPostSrcMac,
    PrintPostDstMac,
    PrintSrcPort,
    PrintDstPort,
    SaveDirection,
    PrintProtoName,
    PrintEngineId,
    PrintApplicationId,
    PrintFlowEndReason,
    PrintBiflowDirection,
    PrintSrcNet,
    PrintDstNet,
    PrintCountryCode,
    PrintAs,
    PrintHttpUrl,
    PrintHttpHost,
    PrintHttpUserAgent,
    PrintHttpReferer,
    PrintHttpsCn,
    SaveSamplingInterval,
    OptionApplicationName,
    OptionSelectorName,
    OptionInterfaceName,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub length: FieldLength,
    pub handler: HandlerKind,
}

/// nProbe's well-known private enterprise number, used below purely to
/// illustrate how an enterprise-scoped field is looked up; the exact field
/// numbers are illustrative, not a claim of wire compatibility with any
/// specific vendor firmware version.
const NTOP_PEN: u32 = 35632;

macro_rules! dict {
    ($($enterprise:expr, $id:expr => $key:expr, $len:expr, $handler:expr;)*) => {
        &[$(
            (FieldKey::new($enterprise, $id), FieldSpec { key: $key, length: $len, handler: $handler }),
        )*]
    };
}

static ENTRIES: &[(FieldKey, FieldSpec)] = dict! {
    0, 1  => "bytes", FieldLength::Fixed(8), HandlerKind::PrintNumber;
    0, 2  => "pkts", FieldLength::Fixed(8), HandlerKind::PrintNumber;
    0, 4  => "l4_proto", FieldLength::Fixed(1), HandlerKind::PrintProtoName;
    0, 5  => "tos", FieldLength::Fixed(1), HandlerKind::PrintNumber;
    0, 6  => "tcp_flags", FieldLength::Fixed(1), HandlerKind::PrintNumber;
    0, 7  => "src_port", FieldLength::Fixed(2), HandlerKind::PrintSrcPort;
    0, 8  => "src", FieldLength::Fixed(4), HandlerKind::PrintSrcIpv4Addr;
    // field 9 (src mask) doesn't print itself: its presence in the template
    // triggers the src_net/src_net_name pair, computed from the already-saved
    // src address against the observation's home-net list rather than from
    // the mask byte on the wire.
    0, 9  => "", FieldLength::Fixed(1), HandlerKind::PrintSrcNet;
    0, 10 => "input_if", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 11 => "dst_port", FieldLength::Fixed(2), HandlerKind::PrintDstPort;
    0, 12 => "dst", FieldLength::Fixed(4), HandlerKind::PrintDstIpv4Addr;
    0, 13 => "", FieldLength::Fixed(1), HandlerKind::PrintDstNet;
    0, 14 => "output_if", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 16 => "src_as", FieldLength::Fixed(4), HandlerKind::PrintAs;
    0, 17 => "dst_as", FieldLength::Fixed(4), HandlerKind::PrintAs;
    0, 21 => "last_switched", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 22 => "first_switched", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 27 => "src", FieldLength::Fixed(16), HandlerKind::PrintSrcIpv6Addr;
    0, 28 => "dst", FieldLength::Fixed(16), HandlerKind::PrintDstIpv6Addr;
    0, 39 => "engine_id_name", FieldLength::Fixed(1), HandlerKind::PrintEngineId;
    0, 34 => "sampling_interval", FieldLength::Fixed(4), HandlerKind::SaveSamplingInterval;
    0, 56 => "src_mac", FieldLength::Fixed(6), HandlerKind::PrintSrcMac;
    0, 57 => "post_dst_mac", FieldLength::Fixed(6), HandlerKind::PrintPostDstMac;
    0, 61 => "", FieldLength::Fixed(1), HandlerKind::SaveDirection;
    0, 80 => "dst_mac", FieldLength::Fixed(6), HandlerKind::PrintDstMac;
    0, 81 => "post_src_mac", FieldLength::Fixed(6), HandlerKind::PrintPostSrcMac;
    0, 95 => "application_id_name", FieldLength::Fixed(4), HandlerKind::PrintApplicationId;
    0, 136 => "flow_end_reason", FieldLength::Fixed(1), HandlerKind::PrintFlowEndReason;
    0, 150 => "first_switched", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 151 => "last_switched", FieldLength::Fixed(4), HandlerKind::PrintNumber;
    0, 152 => "first_switched", FieldLength::Fixed(8), HandlerKind::PrintNumber;
    0, 153 => "last_switched", FieldLength::Fixed(8), HandlerKind::PrintNumber;
    0, 239 => "biflow_direction", FieldLength::Fixed(1), HandlerKind::PrintBiflowDirection;
    NTOP_PEN, 180 => "http_host", FieldLength::Variable, HandlerKind::PrintHttpHost;
    NTOP_PEN, 181 => "http_url", FieldLength::Variable, HandlerKind::PrintHttpUrl;
    NTOP_PEN, 182 => "http_user_agent", FieldLength::Variable, HandlerKind::PrintHttpUserAgent;
    NTOP_PEN, 183 => "http_referer", FieldLength::Variable, HandlerKind::PrintHttpReferer;
    NTOP_PEN, 184 => "https_common_name", FieldLength::Variable, HandlerKind::PrintHttpsCn;
    NTOP_PEN, 190 => "src_country_code", FieldLength::Fixed(2), HandlerKind::PrintCountryCode;
    NTOP_PEN, 191 => "dst_country_code", FieldLength::Fixed(2), HandlerKind::PrintCountryCode;
};

static DICTIONARY: Lazy<HashMap<FieldKey, FieldSpec>> = Lazy::new(|| ENTRIES.iter().copied().collect());

pub fn lookup(enterprise: u32, field_id: u16) -> Option<&'static FieldSpec> {
    DICTIONARY.get(&FieldKey::new(enterprise, field_id))
}

/// Application id / selector id / interface id option-template fields
/// aren't in the static table above (they vary per observation domain's
/// option template contents); the record assembler recognises them by
/// name convention instead. See `assembler::is_option_lookup_field`.
pub fn option_handler_for(field_id: u16) -> Option<HandlerKind> {
    match field_id {
        95 => Some(HandlerKind::OptionApplicationName),
        302 => Some(HandlerKind::OptionSelectorName),
        82 => Some(HandlerKind::OptionInterfaceName),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_standard_field() {
        let spec = lookup(0, 8).expect("SourceIPv4Address should be in the dictionary");
        assert_eq!(spec.key, "src");
        assert_eq!(spec.length, FieldLength::Fixed(4));
        assert_eq!(spec.handler, HandlerKind::PrintSrcIpv4Addr);
    }

    #[test]
    fn looks_up_enterprise_field() {
        let spec = lookup(NTOP_PEN, 181).expect("vendor http_url field should be in the dictionary");
        assert_eq!(spec.key, "http_url");
    }

    #[test]
    fn unknown_field_is_absent() {
        assert!(lookup(0, 65000).is_none());
    }
}
