//! Byte-level decoding (C1 Wire Reader). Parses the datagram header for all
//! three supported versions and classifies each flowset/template-set header
//! that follows it, leaving the heavier per-field work (C3-C7) to
//! `dictionary`, `handlers` and `crate::assembler`.
//!
//! Grounded on the teacher's `flow::ipfix::Header`/`SetHeader` and
//! `flow::netflow5::Header` (same big-endian, fixed-offset `read` idiom);
//! generalized here to cover NetFlow v9's header shape too, since v9 and
//! IPFIX share the same flowset/template wire structure end to end.

pub mod dictionary;
pub mod handlers;
pub mod template;
pub mod v5;

use std::convert::TryInto;

pub const VERSION_V5: u16 = 5;
pub const VERSION_V9: u16 = 9;
pub const VERSION_IPFIX: u16 = 10;

/// The three message headers normalised to the fields the rest of the
/// pipeline actually needs: declared record/flowset count and, for v9 and
/// IPFIX, the observation-domain id (NetFlow v9 calls this `source_id`).
#[derive(Debug)]
pub struct DatagramHeader {
    pub version: u16,
    pub count: u16,
    pub observation_id: u32,
    pub export_time_secs: u32,
}

impl DatagramHeader {
    /// Reads whichever header shape `buf[0..2]` declares. Returns the header
    /// and the number of bytes consumed so the caller can start iterating
    /// flowsets (v9/IPFIX) or fixed-size records (v5) right after it.
    pub fn read(buf: &[u8]) -> Result<(Self, usize), String> {
        if buf.len() < 2 {
            return Err(format!("Not enough space to read a datagram version, required 2 but received {}", buf.len()));
        }
        let version = u16::from_be_bytes(buf[0..2].try_into().unwrap());

        match version {
            VERSION_V5 => {
                let header = v5::Header::read(buf)?;
                Ok((
                    DatagramHeader { version, count: header.count, observation_id: 0, export_time_secs: header.unix_secs },
                    v5::Header::SIZE,
                ))
            }
            VERSION_V9 => {
                const SIZE: usize = 20;
                if buf.len() < SIZE {
                    return Err(format!("Not enough space to read the NetFlow v9 header, required {} but received {}", SIZE, buf.len()));
                }
                let count = u16::from_be_bytes(buf[2..4].try_into().unwrap());
                let export_time_secs = u32::from_be_bytes(buf[4..8].try_into().unwrap());
                let source_id = u32::from_be_bytes(buf[16..20].try_into().unwrap());
                Ok((DatagramHeader { version, count, observation_id: source_id, export_time_secs }, SIZE))
            }
            VERSION_IPFIX => {
                const SIZE: usize = 16;
                if buf.len() < SIZE {
                    return Err(format!("Not enough space to read the IPFIX header, required {} but received {}", SIZE, buf.len()));
                }
                let length = u16::from_be_bytes(buf[2..4].try_into().unwrap());
                let export_time_secs = u32::from_be_bytes(buf[4..8].try_into().unwrap());
                let domain_id = u32::from_be_bytes(buf[12..16].try_into().unwrap());
                if (length as usize) > buf.len() {
                    return Err(format!("IPFIX header declares length {} exceeding datagram size {}", length, buf.len()));
                }
                Ok((DatagramHeader { version, count: 0, observation_id: domain_id, export_time_secs }, SIZE))
            }
            other => Err(format!("Unrecognised NetFlow/IPFIX version {}", other)),
        }
    }
}

/// The 4-byte (set-id, length) header that precedes every v9/IPFIX flowset.
#[derive(Debug)]
pub struct FlowSetHeader {
    pub id: u16,
    pub length: u16,
}

impl FlowSetHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space to read a flowset header, required {} but received {}", Self::SIZE, buf.len()));
        }
        let id = u16::from_be_bytes(buf[0..2].try_into().unwrap());
        let length = u16::from_be_bytes(buf[2..4].try_into().unwrap());
        if (length as usize) < Self::SIZE {
            return Err(format!("Flowset header declares length {} shorter than its own header", length));
        }
        Ok(FlowSetHeader { id, length })
    }

    #[inline]
    pub fn content_size(&self) -> usize {
        self.length as usize - Self::SIZE
    }
}

/// What kind of flowset a header introduces, version-sensitive: NetFlow v9
/// uses set-id 0/1 for template/option-template, IPFIX uses 2/3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSetKind {
    Template,
    OptionTemplate,
    Data(u16),
}

pub fn classify(version: u16, set_id: u16) -> FlowSetKind {
    match (version, set_id) {
        (VERSION_V9, 0) | (VERSION_IPFIX, 2) => FlowSetKind::Template,
        (VERSION_V9, 1) | (VERSION_IPFIX, 3) => FlowSetKind::OptionTemplate,
        (_, id) => FlowSetKind::Data(id),
    }
}

/// Reads the inline length prefix of a variable-length field per §4.3: a
/// single `0xff` byte means the real length is the following big-endian
/// `u16`; any other byte value is itself the length.
pub fn read_variable_length(buf: &[u8]) -> Result<(usize, usize), String> {
    if buf.is_empty() {
        return Err("Not enough space to read a variable-length prefix".to_string());
    }
    if buf[0] == 0xff {
        if buf.len() < 3 {
            return Err("Not enough space to read an extended variable-length prefix".to_string());
        }
        let len = u16::from_be_bytes(buf[1..3].try_into().unwrap());
        Ok((len as usize, 3))
    } else {
        Ok((buf[0] as usize, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn reads_ipfix_header() {
        let buf = hex!("00 0a 00 10 60 80 b8 9c 00 00 00 02 00 00 01 00");
        let (header, consumed) = DatagramHeader::read(&buf).unwrap();
        assert_eq!(header.version, VERSION_IPFIX);
        assert_eq!(header.observation_id, 256);
        assert_eq!(header.export_time_secs, 0x6080b89c);
        assert_eq!(consumed, 16);
    }

    #[test]
    fn reads_v9_header() {
        let buf = hex!("00 09 00 03 00 00 04 b2 60 80 b8 9c 00 00 00 02 00 00 01 00");
        let (header, consumed) = DatagramHeader::read(&buf).unwrap();
        assert_eq!(header.version, VERSION_V9);
        assert_eq!(header.count, 3);
        assert_eq!(header.observation_id, 256);
        assert_eq!(header.export_time_secs, 0x6080b89c);
        assert_eq!(consumed, 20);
    }

    #[test]
    fn rejects_unknown_version() {
        let buf = hex!("00 07 00 00");
        assert!(DatagramHeader::read(&buf).is_err());
    }

    #[test]
    fn classifies_by_version() {
        assert_eq!(classify(VERSION_V9, 0), FlowSetKind::Template);
        assert_eq!(classify(VERSION_IPFIX, 2), FlowSetKind::Template);
        assert_eq!(classify(VERSION_IPFIX, 3), FlowSetKind::OptionTemplate);
        assert_eq!(classify(VERSION_IPFIX, 256), FlowSetKind::Data(256));
    }

    #[test]
    fn variable_length_short_form() {
        let buf = hex!("05 61 62 63 64 65");
        let (len, consumed) = read_variable_length(&buf).unwrap();
        assert_eq!(len, 5);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn variable_length_extended_form() {
        let buf = hex!("ff 01 00");
        let (len, consumed) = read_variable_length(&buf).unwrap();
        assert_eq!(len, 256);
        assert_eq!(consumed, 3);
    }
}
