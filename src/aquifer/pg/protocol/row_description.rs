use crate::aquifer::common::{normalize_ident, Result};
use crate::aquifer::pg::protocol::{Message, Tag};

/// One column of a result set, from a RowDescription message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// name run through normalize_ident, used for named row mapping
    pub name_normalized: String,
    pub type_oid: u32,
}

impl Column {
    pub fn new(name: &str, type_oid: u32) -> Self {
        Column {
            name: name.to_string(),
            name_normalized: normalize_ident(name),
            type_oid,
        }
    }
}

/// Parses a RowDescription message into column descriptors.
/// Each field is: name (cstr), table oid (i32), column attr (i16),
/// type oid (i32), type len (i16), type mod (i32), format code (i16).
pub fn parse_row_description(msg: &Message) -> Result<Vec<Column>> {
    debug_assert_eq!(msg.tag(), Tag::ROW_DESCRIPTION);
    let mut r = msg.reader();
    let num_fields = r.read_i16();
    let mut columns = Vec::with_capacity(num_fields.max(0) as usize);
    for _ in 0..num_fields {
        let name = r.read_str()?.to_string();
        r.read_i32(); // table oid
        r.read_i16(); // column attribute number
        let type_oid = r.read_i32() as u32;
        r.read_i16(); // type len
        r.read_i32(); // type mod
        r.read_i16(); // format code
        r.error()?;
        columns.push(Column {
            name_normalized: normalize_ident(&name),
            name,
            type_oid,
        });
    }
    Ok(columns)
}
