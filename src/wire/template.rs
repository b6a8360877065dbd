//! Unified template representation for NetFlow v9 and IPFIX.
//!
//! Supersedes the ipfix-only `DataSetTemplate`/`OptionDataSetTemplate` pair:
//! one `Template` type now serves both protocols (v9 templates are the same
//! wire shape minus the enterprise-bit extension RFC 7011 §3.4.2 adds for
//! IPFIX), and carries the `(enterprise, field_id)` pair the field
//! dictionary is keyed on instead of a closed `FieldType` enum, since an
//! enterprise PEN is only known at runtime.

use std::convert::TryInto;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use crate::errors::PersistenceError;

pub const ENTERPRISE_BIT: u16 = 0x8000;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TemplateField {
    pub enterprise: u32,
    pub field_id: u16,
    pub length: u16,
}

impl TemplateField {
    /// Size of the fixed part, before the optional 4-byte enterprise number.
    pub const FIXED_SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<(Self, usize), String> {
        if buf.len() < Self::FIXED_SIZE {
            return Err(format!("Not enough space to read a template field, required {} but received {}", Self::FIXED_SIZE, buf.len()));
        }

        let raw_id = u16::from_be_bytes(buf[0..2].try_into().unwrap());
        let length = u16::from_be_bytes(buf[2..4].try_into().unwrap());

        if raw_id & ENTERPRISE_BIT != 0 {
            let size = Self::FIXED_SIZE + 4;
            if buf.len() < size {
                return Err(format!("Not enough space to read an enterprise template field, required {} but received {}", size, buf.len()));
            }
            let enterprise = u32::from_be_bytes(buf[4..8].try_into().unwrap());
            Ok((TemplateField { enterprise, field_id: raw_id & !ENTERPRISE_BIT, length }, size))
        } else {
            Ok((TemplateField { enterprise: 0, field_id: raw_id, length }, Self::FIXED_SIZE))
        }
    }
}

/// A NetFlow v9 / IPFIX template, regular or option. `scope_field_count` is
/// 0 for a regular template; for an option template the first
/// `scope_field_count` entries in `fields` are the scope fields.
#[derive(Debug)]
pub struct Template {
    pub id: u16,
    pub scope_field_count: u16,
    pub fields: Vec<TemplateField>,
    /// Sum of the fixed-length fields; a template containing a
    /// variable-length field (`length == 0xffff`) has no single fixed
    /// record size and the assembler must walk it field by field.
    pub fixed_length: usize,
}

impl Template {
    pub const VARIABLE_LENGTH: u16 = 0xffff;

    pub fn is_option(&self) -> bool {
        self.scope_field_count > 0
    }

    pub fn has_variable_length_field(&self) -> bool {
        self.fields.iter().any(|f| f.length == Self::VARIABLE_LENGTH)
    }

    /// Walks `buf` far enough to find where one record against this
    /// template ends, without interpreting any field's value — the
    /// dispatcher needs this to carve out a record's byte slice before
    /// handing it to a worker, even for templates it otherwise never
    /// decodes itself (e.g. a data flowset whose template isn't known yet
    /// is skipped, but a known one still needs its true length).
    pub fn record_length(&self, buf: &[u8]) -> Result<usize, String> {
        if !self.has_variable_length_field() {
            if buf.len() < self.fixed_length {
                return Err(format!("record truncated: need {} bytes but only {} available", self.fixed_length, buf.len()));
            }
            return Ok(self.fixed_length);
        }

        let mut offset = 0usize;
        for field in &self.fields {
            if offset > buf.len() {
                return Err("record truncated while walking variable-length fields".to_string());
            }
            if field.length == Self::VARIABLE_LENGTH {
                let (len, prefix) = crate::wire::read_variable_length(&buf[offset..])?;
                offset += prefix + len;
            } else {
                offset += field.length as usize;
            }
        }
        if offset > buf.len() {
            return Err("record truncated while walking variable-length fields".to_string());
        }
        Ok(offset)
    }

    /// Reads a regular (Set ID 2) template record: `id:u16, field_count:u16`
    /// followed by `field_count` template fields.
    pub fn read_data(buf: &[u8]) -> Result<(Self, usize), String> {
        const HEADER_SIZE: usize = 4;
        if buf.len() < HEADER_SIZE {
            return Err(format!("Not enough space to read a template header, required {} but received {}", HEADER_SIZE, buf.len()));
        }

        let id = u16::from_be_bytes(buf[0..2].try_into().unwrap());
        let field_count = u16::from_be_bytes(buf[2..4].try_into().unwrap());

        let (fields, fixed_length, consumed) = Self::read_fields(&buf[HEADER_SIZE..], field_count)?;
        Ok((Template { id, scope_field_count: 0, fields, fixed_length }, HEADER_SIZE + consumed))
    }

    /// Reads an option (Set ID 3) template record: `id:u16, field_count:u16,
    /// scope_field_count:u16` followed by `field_count` template fields (the
    /// first `scope_field_count` of which are scope fields).
    pub fn read_option(buf: &[u8]) -> Result<(Self, usize), String> {
        const HEADER_SIZE: usize = 6;
        if buf.len() < HEADER_SIZE {
            return Err(format!("Not enough space to read an option template header, required {} but received {}", HEADER_SIZE, buf.len()));
        }

        let id = u16::from_be_bytes(buf[0..2].try_into().unwrap());
        let field_count = u16::from_be_bytes(buf[2..4].try_into().unwrap());
        let scope_field_count = u16::from_be_bytes(buf[4..6].try_into().unwrap());

        let (fields, fixed_length, consumed) = Self::read_fields(&buf[HEADER_SIZE..], field_count)?;
        Ok((Template { id, scope_field_count: scope_field_count.max(1), fields, fixed_length }, HEADER_SIZE + consumed))
    }

    fn read_fields(buf: &[u8], field_count: u16) -> Result<(Vec<TemplateField>, usize, usize), String> {
        let mut fields = Vec::with_capacity(field_count as usize);
        let mut offset = 0;
        let mut fixed_length = 0;

        for _ in 0..field_count {
            let (field, size_read) = TemplateField::read(&buf[offset..])?;
            if field.length != Self::VARIABLE_LENGTH {
                fixed_length += field.length as usize;
            }
            fields.push(field);
            offset += size_read;
        }

        Ok((fields, fixed_length, offset))
    }
}

/// Identifies the scope a stored template belongs to, for the on-disk dump.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope {
    pub sensor_ip: IpAddr,
    pub observation_id: u32,
}

fn ip_to_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn bytes_to_ip(bytes: [u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

const DUMP_VERSION: u32 = 1;

/// Writes the version-stamped, length-prefixed template dump: every
/// `(scope, template)` pair the caller hands in, one after another.
///
/// Format: `version:u32, count:u32, (sensor_ip:[u8;16], obs_id:u32,
/// template_id:u16, scope_field_count:u16, field_count:u16, (pen:u32,
/// field_id:u16, len:u16){field_count}){count}` — all integers big-endian,
/// written with `bincode`'s fixint encoding so the format is stable across
/// process restarts regardless of host endianness.
pub fn write_dump<'a, W, I>(writer: W, entries: I) -> Result<usize, PersistenceError>
where
    W: Write,
    I: IntoIterator<Item = (TemplateScope, &'a Template)>,
{
    use bincode::Options;
    let opts = bincode::DefaultOptions::new().with_fixint_encoding().with_big_endian();

    let entries: Vec<_> = entries.into_iter().collect();
    let mut w = writer;

    opts.serialize_into(&mut w, &DUMP_VERSION)?;
    opts.serialize_into(&mut w, &(entries.len() as u32))?;

    for (scope, template) in &entries {
        opts.serialize_into(&mut w, &ip_to_bytes(scope.sensor_ip))?;
        opts.serialize_into(&mut w, &scope.observation_id)?;
        opts.serialize_into(&mut w, &template.id)?;
        opts.serialize_into(&mut w, &template.scope_field_count)?;
        opts.serialize_into(&mut w, &(template.fields.len() as u16))?;

        for field in &template.fields {
            opts.serialize_into(&mut w, &field.enterprise)?;
            opts.serialize_into(&mut w, &field.field_id)?;
            opts.serialize_into(&mut w, &field.length)?;
        }
    }

    Ok(entries.len())
}

pub fn write_dump_file<'a, I>(path: &Path, entries: I) -> Result<usize, PersistenceError>
where
    I: IntoIterator<Item = (TemplateScope, &'a Template)>,
{
    let file = std::fs::File::create(path).map_err(|source| PersistenceError::Io { path: path.to_path_buf(), source })?;
    write_dump(std::io::BufWriter::new(file), entries)
}

/// Reads back a dump written by [`write_dump`]. A version mismatch or any
/// truncation surfaces as `PersistenceError::Encode` via `bincode`'s own
/// error, since the dump is a cache the caller can always rebuild from live
/// traffic.
pub fn read_dump<R: Read>(reader: R) -> Result<Vec<(TemplateScope, Template)>, PersistenceError> {
    use bincode::Options;
    let opts = bincode::DefaultOptions::new().with_fixint_encoding().with_big_endian();

    let mut r = reader;
    let version: u32 = opts.deserialize_from(&mut r)?;
    if version != DUMP_VERSION {
        return Err(PersistenceError::Encode(bincode::ErrorKind::Custom(format!("unsupported template dump version {}", version)).into()));
    }

    let count: u32 = opts.deserialize_from(&mut r)?;
    let mut out = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let sensor_ip: [u8; 16] = opts.deserialize_from(&mut r)?;
        let observation_id: u32 = opts.deserialize_from(&mut r)?;
        let id: u16 = opts.deserialize_from(&mut r)?;
        let scope_field_count: u16 = opts.deserialize_from(&mut r)?;
        let field_count: u16 = opts.deserialize_from(&mut r)?;

        let mut fields = Vec::with_capacity(field_count as usize);
        let mut fixed_length = 0usize;
        for _ in 0..field_count {
            let enterprise: u32 = opts.deserialize_from(&mut r)?;
            let field_id: u16 = opts.deserialize_from(&mut r)?;
            let length: u16 = opts.deserialize_from(&mut r)?;
            if length != Template::VARIABLE_LENGTH {
                fixed_length += length as usize;
            }
            fields.push(TemplateField { enterprise, field_id, length });
        }

        out.push((
            TemplateScope { sensor_ip: bytes_to_ip(sensor_ip), observation_id },
            Template { id, scope_field_count, fields, fixed_length },
        ));
    }

    Ok(out)
}

pub fn read_dump_file(path: &Path) -> Result<Vec<(TemplateScope, Template)>, PersistenceError> {
    let file = std::fs::File::open(path).map_err(|source| PersistenceError::Io { path: path.to_path_buf(), source })?;
    read_dump(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::net::Ipv4Addr;

    const TEMPLATE_PAYLOAD: [u8; 112] = hex!(
        "01 00 00 1b 00 08 00 04 00 0c 00 04 00 05 00 01
         00 04 00 01 00 07 00 02 00 0b 00 02 00 20 00 02
         00 0a 00 04 00 3a 00 02 00 09 00 01 00 0d 00 01
         00 10 00 04 00 11 00 04 00 0f 00 04 00 06 00 01
         00 0e 00 04 00 01 00 08 00 02 00 08 00 34 00 01
         00 35 00 01 00 98 00 08 00 99 00 08 00 88 00 01
         00 3d 00 01 00 f3 00 02 00 f5 00 02 00 36 00 04"
    );

    #[test]
    fn read_data_template() {
        let (template, size_read) = Template::read_data(&TEMPLATE_PAYLOAD).unwrap();

        assert_eq!(template.id, 256);
        assert_eq!(template.fields.len(), 27);
        assert_eq!(size_read, TEMPLATE_PAYLOAD.len());
        assert!(!template.is_option());
        assert_eq!(template.fields[0], TemplateField { enterprise: 0, field_id: 8, length: 4 });
        assert_eq!(template.fields[1], TemplateField { enterprise: 0, field_id: 12, length: 4 });
    }

    #[test]
    fn enterprise_bit_pulls_in_pen() {
        // field id 100 | ENTERPRISE_BIT, length 4, pen 12345
        let buf = hex!("80 64 00 04 00 00 30 39");
        let (field, size_read) = TemplateField::read(&buf).unwrap();

        assert_eq!(size_read, 8);
        assert_eq!(field.field_id, 100);
        assert_eq!(field.enterprise, 12345);
        assert_eq!(field.length, 4);
    }

    #[test]
    fn regular_field_has_no_enterprise() {
        let buf = hex!("00 08 00 04");
        let (field, size_read) = TemplateField::read(&buf).unwrap();

        assert_eq!(size_read, 4);
        assert_eq!(field.enterprise, 0);
        assert_eq!(field.field_id, 8);
    }

    #[test]
    fn variable_length_field_excluded_from_fixed_length() {
        // SourceIPv4Address (8, len 4) then an opaque variable-length field
        let buf = hex!("00 08 00 04 00 29 ff ff");
        let (fields, fixed_length, consumed) = Template::read_fields(&buf, 2).unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fixed_length, 4);
        assert_eq!(consumed, 8);
        assert!(fields[1].length == Template::VARIABLE_LENGTH);
    }

    #[test]
    fn record_length_walks_variable_length_fields() {
        let fields = vec![TemplateField { enterprise: 0, field_id: 8, length: 4 }, TemplateField { enterprise: 0, field_id: 180, length: Template::VARIABLE_LENGTH }];
        let template = Template { id: 300, scope_field_count: 0, fields, fixed_length: 4 };

        let buf = hex!("01 02 03 04 03 61 62 63 ff ff");
        assert_eq!(template.record_length(&buf).unwrap(), 8);
    }

    #[test]
    fn record_length_fixed_template_rejects_truncation() {
        let fields = vec![TemplateField { enterprise: 0, field_id: 8, length: 4 }];
        let template = Template { id: 300, scope_field_count: 0, fields, fixed_length: 4 };
        assert!(template.record_length(&[1, 2]).is_err());
    }

    #[test]
    fn dump_round_trips() {
        let (template, _) = Template::read_data(&TEMPLATE_PAYLOAD).unwrap();
        let scope = TemplateScope { sensor_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), observation_id: 256 };

        let mut buf = Vec::new();
        let count = write_dump(&mut buf, vec![(scope, &template)]).unwrap();
        assert_eq!(count, 1);

        let restored = read_dump(&buf[..]).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].0.observation_id, 256);
        assert_eq!(restored[0].0.sensor_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(restored[0].1.id, template.id);
        assert_eq!(restored[0].1.fields, template.fields);
    }

    #[test]
    fn rejects_unknown_dump_version() {
        use bincode::Options;
        let opts = bincode::DefaultOptions::new().with_fixint_encoding().with_big_endian();
        let mut buf = Vec::new();
        opts.serialize_into(&mut buf, &99u32).unwrap();
        opts.serialize_into(&mut buf, &0u32).unwrap();

        assert!(read_dump(&buf[..]).is_err());
    }
}
