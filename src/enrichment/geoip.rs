//! GeoIP lookups (C6). The database file format is explicitly out of scope
//! (SPEC_FULL.md §1); this crate ships only the `GeoIpSource` trait plus a
//! null implementation so the pipeline runs end-to-end. A real database
//! reader plugs in by implementing the trait.

use std::net::IpAddr;

pub trait GeoIpSource: Send + Sync {
    fn country_code(&self, ip: IpAddr) -> Option<&str>;
    fn asn(&self, ip: IpAddr) -> Option<(u32, &str)>;
}

pub struct NullGeoIp;

impl GeoIpSource for NullGeoIp {
    fn country_code(&self, _ip: IpAddr) -> Option<&str> {
        None
    }

    fn asn(&self, _ip: IpAddr) -> Option<(u32, &str)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn null_source_always_misses() {
        let geo = NullGeoIp;
        let ip = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(geo.country_code(ip), None);
        assert_eq!(geo.asn(ip), None);
    }
}
