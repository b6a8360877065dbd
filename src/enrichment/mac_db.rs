//! MAC-vendor and MAC-name lookup tables (C6). Both are in-memory maps
//! loadable from a simple `"xx:xx:xx" "label"` text file; real population is
//! an operational concern external to this crate (out of scope, like the
//! GeoIP file parser), so the loader is intentionally tiny.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::RwLock;

fn oui(mac: u64) -> u32 {
    ((mac >> 24) & 0xff_ffff) as u32
}

#[derive(Default)]
pub struct MacVendorDb {
    by_oui: RwLock<HashMap<u32, String>>,
}

impl MacVendorDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, mac: u64) -> Option<String> {
        self.by_oui.read().unwrap().get(&oui(mac)).cloned()
    }

    pub fn insert(&self, oui_value: u32, vendor: String) {
        self.by_oui.write().unwrap().insert(oui_value, vendor);
    }

    pub fn reload(&self, path: &Path) -> std::io::Result<usize> {
        let file = std::fs::File::open(path)?;
        let mut fresh = HashMap::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            if let Some((oui_hex, vendor)) = line.split_once(char::is_whitespace) {
                if let Ok(value) = u32::from_str_radix(oui_hex.trim().replace(':', "").as_str(), 16) {
                    fresh.insert(value, vendor.trim().to_string());
                }
            }
        }
        let count = fresh.len();
        *self.by_oui.write().unwrap() = fresh;
        Ok(count)
    }
}

#[derive(Default)]
pub struct MacNameDb {
    by_mac: RwLock<HashMap<u64, String>>,
}

impl MacNameDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, mac: u64) -> Option<String> {
        self.by_mac.read().unwrap().get(&mac).cloned()
    }

    pub fn insert(&self, mac: u64, name: String) {
        self.by_mac.write().unwrap().insert(mac, name);
    }
}

/// Renders a MAC the way the output line wants it: operator label, else
/// vendor-prefixed, else the raw address, per SPEC_FULL.md §4.5.
pub fn render_mac(mac: u64, bytes: [u8; 6], name_db: &MacNameDb, vendor_db: &MacVendorDb) -> String {
    if let Some(label) = name_db.lookup(mac) {
        return label;
    }
    let raw = format!("{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]);
    match vendor_db.lookup(mac) {
        Some(vendor) => format!("{}:{}", vendor, raw),
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_overrides_vendor() {
        let names = MacNameDb::new();
        let vendors = MacVendorDb::new();
        let mac = 0xaabbcc001122u64;
        vendors.insert(0xaabbcc, "Acme".to_string());
        names.insert(mac, "core-switch-1".to_string());

        assert_eq!(render_mac(mac, [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22], &names, &vendors), "core-switch-1");
    }

    #[test]
    fn falls_back_to_vendor_prefixed_raw_mac() {
        let names = MacNameDb::new();
        let vendors = MacVendorDb::new();
        let mac = 0xaabbcc001122u64;
        vendors.insert(0xaabbcc, "Acme".to_string());

        assert_eq!(render_mac(mac, [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22], &names, &vendors), "Acme:aa:bb:cc:00:11:22");
    }

    #[test]
    fn falls_back_to_raw_mac_when_nothing_known() {
        let names = MacNameDb::new();
        let vendors = MacVendorDb::new();
        let mac = 0xaabbcc001122u64;

        assert_eq!(render_mac(mac, [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22], &names, &vendors), "aa:bb:cc:00:11:22");
    }
}
