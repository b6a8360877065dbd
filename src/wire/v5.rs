//! NetFlow v5's built-in synthetic template (§4.1: "NetFlow v5 ... is
//! decoded via a built-in synthetic template and is otherwise a degenerate
//! case of the same pipeline"). Field order and lengths are taken verbatim
//! from the teacher's `flow::netflow5::DataSet::read`; wrapping them as a
//! `Template` lets the record assembler decode v5 records with exactly the
//! same field-walking loop it uses for v9/IPFIX.
//!
//! Fields with no counterpart in the field dictionary (next-hop, the two
//! reserved pad bytes) use [`PAD_FIELD`], a field id the dictionary never
//! assigns, so the assembler's normal "unknown field ⇒ skip silently"
//! behaviour consumes their bytes without emitting a key.

use crate::wire::template::{Template, TemplateField};

pub const RECORD_SIZE: usize = 48;

/// Never present in `wire::dictionary`; used for the v5 layout's
/// next-hop/padding bytes that carry no field dictionary semantics.
const PAD_FIELD: u16 = 0xfffe;

pub fn synthetic_template() -> Template {
    let fields = vec![
        TemplateField { enterprise: 0, field_id: 8, length: 4 },      // src_addr
        TemplateField { enterprise: 0, field_id: 12, length: 4 },     // dst_addr
        TemplateField { enterprise: 0, field_id: PAD_FIELD, length: 4 }, // next_hop
        TemplateField { enterprise: 0, field_id: 10, length: 2 },     // input_int
        TemplateField { enterprise: 0, field_id: 14, length: 2 },     // output_int
        TemplateField { enterprise: 0, field_id: 2, length: 4 },      // packets
        TemplateField { enterprise: 0, field_id: 1, length: 4 },      // octets
        TemplateField { enterprise: 0, field_id: 22, length: 4 },     // start_time
        TemplateField { enterprise: 0, field_id: 21, length: 4 },     // end_time
        TemplateField { enterprise: 0, field_id: 7, length: 2 },      // src_port
        TemplateField { enterprise: 0, field_id: 11, length: 2 },     // dst_port
        TemplateField { enterprise: 0, field_id: PAD_FIELD, length: 1 }, // pad1
        TemplateField { enterprise: 0, field_id: 6, length: 1 },      // tcp_flag
        TemplateField { enterprise: 0, field_id: 4, length: 1 },      // protocol
        TemplateField { enterprise: 0, field_id: 5, length: 1 },      // tos
        TemplateField { enterprise: 0, field_id: 16, length: 2 },     // src_as
        TemplateField { enterprise: 0, field_id: 17, length: 2 },     // dst_as
        TemplateField { enterprise: 0, field_id: 9, length: 1 },      // src_mask
        TemplateField { enterprise: 0, field_id: 13, length: 1 },     // dst_mask
        TemplateField { enterprise: 0, field_id: PAD_FIELD, length: 2 }, // pad2
    ];

    let fixed_length = fields.iter().map(|f| f.length as usize).sum();
    Template { id: 0, scope_field_count: 0, fields, fixed_length }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_template_matches_the_wire_record_size() {
        let template = synthetic_template();
        assert_eq!(template.fixed_length, RECORD_SIZE);
        assert!(!template.has_variable_length_field());
        assert!(!template.is_option());
    }

    #[test]
    fn synthetic_template_field_order_matches_netflow5_layout() {
        let template = synthetic_template();
        let ids: Vec<u16> = template.fields.iter().map(|f| f.field_id).collect();
        assert_eq!(ids[0], 8); // src
        assert_eq!(ids[1], 12); // dst
        assert_eq!(ids[5], 2); // packets
        assert_eq!(ids[6], 1); // octets
        assert_eq!(*ids.last().unwrap(), PAD_FIELD);
    }
}
