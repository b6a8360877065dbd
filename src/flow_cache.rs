//! Per-record scratchpad threaded across field handlers while one data
//! record is being decoded. Grounded on `Bigomby/f2k`'s `guessDirection` /
//! `ip_direction` / `mac_direction` (`export.c` lines ~64-130): the same
//! tie-break order (explicit field, then MAC, then home-net IP) is kept,
//! but "never fatal" is expressed as `Direction::Unset` rather than a
//! sentinel return code.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::sensors::mac_as_u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unset,
    Ingress,
    Egress,
    Internal,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Unset => "",
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
            Direction::Internal => "internal",
        }
    }
}

fn is_valid_unicast(mac: Option<[u8; 6]>) -> bool {
    match mac {
        // a zero MAC or one with the multicast/broadcast bit set never
        // identifies a real host for inference purposes.
        Some(m) => m != [0; 6] && (m[0] & 0x01) == 0,
        None => false,
    }
}

/// Holds the two addresses handlers save during decoding, always normalized
/// to IPv4-mapped IPv6 so v4 and v6 fields share one comparison path.
#[derive(Default)]
pub struct FlowCache {
    pub src_addr: Option<Ipv6Addr>,
    pub dst_addr: Option<Ipv6Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,

    pub src_mac: Option<[u8; 6]>,
    pub dst_mac: Option<[u8; 6]>,
    pub post_src_mac: Option<[u8; 6]>,
    pub post_dst_mac: Option<[u8; 6]>,

    direction: Direction,
    direction_explicit: bool,

    client_mac_printed: bool,

    pub client_name: Option<Arc<str>>,
    pub target_name: Option<Arc<str>>,

    /// Set by the `SAMPLING_INTERVAL` field when present on the record's
    /// template; `PrintNumber` multiplies `bytes`/`pkts` by it so sampled
    /// exporters still report extrapolated totals.
    pub sampling_interval: Option<u32>,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_ipv4_src(&mut self, addr: Ipv4Addr) {
        self.src_addr = Some(addr.to_ipv6_mapped());
    }

    pub fn save_ipv4_dst(&mut self, addr: Ipv4Addr) {
        self.dst_addr = Some(addr.to_ipv6_mapped());
    }

    pub fn save_ipv6_src(&mut self, addr: Ipv6Addr) {
        self.src_addr = Some(addr);
    }

    pub fn save_ipv6_dst(&mut self, addr: Ipv6Addr) {
        self.dst_addr = Some(addr);
    }

    pub fn src_ip(&self) -> Option<IpAddr> {
        self.src_addr.map(unmap)
    }

    pub fn dst_ip(&self) -> Option<IpAddr> {
        self.dst_addr.map(unmap)
    }

    /// Explicit `DIRECTION` field from the wire always wins, including over
    /// an explicit value already set earlier in the same record (later
    /// explicit wins, per the invariant recorded in SPEC_FULL.md §3(iii) —
    /// direction never reverts to unset, but a later explicit save may
    /// still override an earlier explicit save).
    pub fn save_explicit_direction(&mut self, ingress: bool) {
        self.direction = if ingress { Direction::Ingress } else { Direction::Egress };
        self.direction_explicit = true;
    }

    /// Runs MAC inference then IP inference if no explicit direction has
    /// been saved yet. `span_mode` selects `dst_mac` (pre-route) vs
    /// `post_dst_mac` (post-route, router-rewritten). `is_router_mac`
    /// answers "is this MAC address the router's" for the owning sensor;
    /// MAC inference only commits to a direction when exactly one side is
    /// the router, matching `mac_direction(src_is_router, dst_is_router)`:
    /// egress when src is the router and dst isn't, ingress when dst is the
    /// router and src isn't, and otherwise it defers to IP inference below
    /// (neither MAC being the router is as inconclusive as both being it).
    pub fn infer_direction(&mut self, is_router_mac: impl Fn(u64) -> bool, span_mode: bool, ip_in_home_net: impl Fn(IpAddr) -> bool) {
        if self.direction_explicit {
            return;
        }

        let dst_mac = if span_mode { self.dst_mac } else { self.post_dst_mac };
        if is_valid_unicast(self.src_mac) && is_valid_unicast(dst_mac) {
            let src_is_router = is_router_mac(mac_as_u64(&self.src_mac.unwrap()));
            let dst_is_router = is_router_mac(mac_as_u64(&dst_mac.unwrap()));
            match (src_is_router, dst_is_router) {
                (true, false) => {
                    self.direction = Direction::Egress;
                    return;
                }
                (false, true) => {
                    self.direction = Direction::Ingress;
                    return;
                }
                _ => {}
            }
        }

        if let (Some(src), Some(dst)) = (self.src_ip(), self.dst_ip()) {
            let src_home = ip_in_home_net(src);
            let dst_home = ip_in_home_net(dst);
            self.direction = match (src_home, dst_home) {
                (true, true) => Direction::Internal,
                (true, false) => Direction::Egress,
                (false, true) => Direction::Ingress,
                (false, false) => Direction::Unset,
            };
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Client is the side the flow originates from: src for ingress, dst
    /// for egress, dst (falling back to src) for internal.
    pub fn client_ip(&self) -> Option<IpAddr> {
        match self.direction {
            Direction::Ingress => self.src_ip(),
            Direction::Egress => self.dst_ip(),
            Direction::Internal => self.dst_ip().or_else(|| self.src_ip()),
            Direction::Unset => None,
        }
    }

    pub fn target_ip(&self) -> Option<IpAddr> {
        match self.direction {
            Direction::Ingress => self.dst_ip(),
            Direction::Egress => self.src_ip(),
            Direction::Internal => self.src_ip().or_else(|| self.dst_ip()),
            Direction::Unset => None,
        }
    }

    pub fn client_mac(&self) -> Option<[u8; 6]> {
        match self.direction {
            Direction::Ingress => self.src_mac,
            Direction::Egress => self.dst_mac,
            Direction::Internal => self.dst_mac.or(self.src_mac),
            Direction::Unset => None,
        }
    }

    /// `client_mac` prints at most once per record; returns `true` the
    /// first time it's called for this record, `false` on any later call.
    pub fn take_client_mac_print_slot(&mut self) -> bool {
        if self.client_mac_printed {
            false
        } else {
            self.client_mac_printed = true;
            true
        }
    }
}

fn unmap(v6: Ipv6Addr) -> IpAddr {
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_direction_wins_over_inference() {
        let mut fc = FlowCache::new();
        fc.save_explicit_direction(true);
        fc.save_ipv4_src(Ipv4Addr::new(192, 168, 1, 1));
        fc.save_ipv4_dst(Ipv4Addr::new(8, 8, 8, 8));

        fc.infer_direction(|_| true, false, |_| true);

        assert_eq!(fc.direction(), Direction::Ingress);
    }

    #[test]
    fn mac_inference_is_egress_when_src_is_the_router() {
        let mut fc = FlowCache::new();
        let router = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let host = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        fc.src_mac = Some(router);
        fc.post_dst_mac = Some(host);

        fc.infer_direction(|mac| mac == mac_as_u64(&router), false, |_| false);

        assert_eq!(fc.direction(), Direction::Egress);
    }

    #[test]
    fn mac_inference_is_ingress_when_post_dst_mac_is_the_router() {
        let mut fc = FlowCache::new();
        let router = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let host = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        fc.src_mac = Some(host);
        fc.post_dst_mac = Some(router);
        fc.dst_mac = None;

        // not span mode: should consult post_dst_mac, not dst_mac
        fc.infer_direction(|mac| mac == mac_as_u64(&router), false, |_| false);

        assert_eq!(fc.direction(), Direction::Ingress);
    }

    #[test]
    fn mac_inference_defers_to_ip_inference_when_neither_side_is_the_router() {
        let mut fc = FlowCache::new();
        fc.src_mac = Some([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        fc.post_dst_mac = Some([0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c]);
        fc.save_ipv4_src(Ipv4Addr::new(10, 0, 0, 1));
        fc.save_ipv4_dst(Ipv4Addr::new(8, 8, 8, 8));

        fc.infer_direction(|_| false, false, |ip| matches!(ip, IpAddr::V4(v4) if v4.octets()[0] == 10));

        assert_eq!(fc.direction(), Direction::Egress);
    }

    #[test]
    fn ip_inference_classifies_internal_ingress_egress() {
        let home = |ip: IpAddr| matches!(ip, IpAddr::V4(v4) if v4.octets()[0] == 10);

        let mut internal = FlowCache::new();
        internal.save_ipv4_src(Ipv4Addr::new(10, 0, 0, 1));
        internal.save_ipv4_dst(Ipv4Addr::new(10, 0, 0, 2));
        internal.infer_direction(|_| false, false, home);
        assert_eq!(internal.direction(), Direction::Internal);

        let mut egress = FlowCache::new();
        egress.save_ipv4_src(Ipv4Addr::new(10, 0, 0, 1));
        egress.save_ipv4_dst(Ipv4Addr::new(8, 8, 8, 8));
        egress.infer_direction(|_| false, false, home);
        assert_eq!(egress.direction(), Direction::Egress);

        let mut ingress = FlowCache::new();
        ingress.save_ipv4_src(Ipv4Addr::new(8, 8, 8, 8));
        ingress.save_ipv4_dst(Ipv4Addr::new(10, 0, 0, 1));
        ingress.infer_direction(|_| false, false, home);
        assert_eq!(ingress.direction(), Direction::Ingress);
    }

    #[test]
    fn client_mac_prints_only_once() {
        let mut fc = FlowCache::new();
        assert!(fc.take_client_mac_print_slot());
        assert!(!fc.take_client_mac_print_slot());
    }

    #[test]
    fn client_and_target_follow_direction() {
        let mut fc = FlowCache::new();
        fc.save_explicit_direction(true);
        fc.save_ipv4_src(Ipv4Addr::new(1, 1, 1, 1));
        fc.save_ipv4_dst(Ipv4Addr::new(2, 2, 2, 2));

        assert_eq!(fc.client_ip(), Some(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))));
        assert_eq!(fc.target_ip(), Some(IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2))));
    }
}
