//! Query parameter encoding for the extended query protocol.
//!
//! Each argument encodes into one or more `Param` slots. Scalars, strings,
//! options and arrays occupy exactly one slot; tuples expand positionally
//! into one slot per element, so the `$1..$n` count of the SQL text matches
//! the encoded sequence. Custom types (e.g. enums rendered as token text)
//! implement `ToParam` directly.

pub const FORMAT_TEXT: i16 = 0;
pub const FORMAT_BINARY: i16 = 1;

/// Type OIDs the encoder stamps on parameter slots.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BOOL_ARRAY: u32 = 1000;
    pub const INT2_ARRAY: u32 = 1005;
    pub const INT4_ARRAY: u32 = 1007;
    pub const TEXT_ARRAY: u32 = 1009;
    pub const INT8_ARRAY: u32 = 1016;
    pub const FLOAT4_ARRAY: u32 = 1021;
    pub const FLOAT8_ARRAY: u32 = 1022;
    pub const JSONB: u32 = 3802;
}

/// One bound parameter: optional bytes (None = SQL NULL), wire format
/// (0 text / 1 binary), and the type OID (0 lets the server infer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub value: Option<Vec<u8>>,
    pub format: i16,
    pub oid: u32,
}

impl Param {
    pub fn null() -> Self {
        Param {
            value: None,
            format: FORMAT_TEXT,
            oid: 0,
        }
    }

    pub fn text(value: impl Into<String>, oid: u32) -> Self {
        Param {
            value: Some(value.into().into_bytes()),
            format: FORMAT_TEXT,
            oid,
        }
    }

    pub fn binary(value: Vec<u8>, oid: u32) -> Self {
        Param {
            value: Some(value),
            format: FORMAT_BINARY,
            oid,
        }
    }
}

/// A value that encodes into exactly one parameter slot.
pub trait ToParam {
    fn to_param(&self) -> Param;
}

/// A value that encodes into zero or more parameter slots.
/// Implemented for every `ToParam` (one slot) and for tuples (positional
/// expansion). The slot count is fixed by the static type.
pub trait ToParams {
    fn write_params(&self, out: &mut Vec<Param>);
}

impl<T: ToParam> ToParams for T {
    fn write_params(&self, out: &mut Vec<Param>) {
        out.push(self.to_param());
    }
}

impl ToParams for () {
    fn write_params(&self, _out: &mut Vec<Param>) {}
}

macro_rules! impl_tuple_params {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: ToParams),+> ToParams for ($($name,)+) {
            fn write_params(&self, out: &mut Vec<Param>) {
                $(self.$idx.write_params(out);)+
            }
        }
    };
}

impl_tuple_params!(A: 0);
impl_tuple_params!(A: 0, B: 1);
impl_tuple_params!(A: 0, B: 1, C: 2);
impl_tuple_params!(A: 0, B: 1, C: 2, D: 3);
impl_tuple_params!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple_params!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_tuple_params!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_tuple_params!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

pub fn collect_params(params: &impl ToParams) -> Vec<Param> {
    let mut out = Vec::new();
    params.write_params(&mut out);
    out
}

impl ToParam for bool {
    fn to_param(&self) -> Param {
        Param::binary(vec![*self as u8], oid::BOOL)
    }
}

impl ToParam for i16 {
    fn to_param(&self) -> Param {
        Param::binary(self.to_be_bytes().to_vec(), oid::INT2)
    }
}

impl ToParam for i32 {
    fn to_param(&self) -> Param {
        Param::binary(self.to_be_bytes().to_vec(), oid::INT4)
    }
}

impl ToParam for i64 {
    fn to_param(&self) -> Param {
        Param::binary(self.to_be_bytes().to_vec(), oid::INT8)
    }
}

impl ToParam for f32 {
    fn to_param(&self) -> Param {
        Param::binary(self.to_be_bytes().to_vec(), oid::FLOAT4)
    }
}

impl ToParam for f64 {
    fn to_param(&self) -> Param {
        Param::binary(self.to_be_bytes().to_vec(), oid::FLOAT8)
    }
}

impl ToParam for &str {
    fn to_param(&self) -> Param {
        // oid 0: the server infers the text type from context
        Param::text(*self, 0)
    }
}

impl ToParam for String {
    fn to_param(&self) -> Param {
        Param::text(self.as_str(), 0)
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> Param {
        match self {
            Some(v) => v.to_param(),
            None => Param::null(),
        }
    }
}

impl ToParam for serde_json::Value {
    fn to_param(&self) -> Param {
        Param::text(self.to_string(), oid::JSON)
    }
}

/// Wrapper stamping a JSON value with the jsonb type OID.
#[derive(Debug, Clone, PartialEq)]
pub struct Jsonb(pub serde_json::Value);

impl ToParam for Jsonb {
    fn to_param(&self) -> Param {
        Param::text(self.0.to_string(), oid::JSONB)
    }
}

/// An element type that can appear inside a PG text array literal.
pub trait ArrayElement {
    const ARRAY_OID: u32;
    /// Appends the element rendered as an array literal element
    /// (bare for numerics/bools, quoted+escaped for strings).
    fn push_literal(&self, out: &mut String);
}

fn push_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

macro_rules! impl_numeric_array_element {
    ($ty:ty, $oid:expr) => {
        impl ArrayElement for $ty {
            const ARRAY_OID: u32 = $oid;
            fn push_literal(&self, out: &mut String) {
                out.push_str(&self.to_string());
            }
        }
    };
}

impl_numeric_array_element!(i16, oid::INT2_ARRAY);
impl_numeric_array_element!(i32, oid::INT4_ARRAY);
impl_numeric_array_element!(i64, oid::INT8_ARRAY);
impl_numeric_array_element!(f32, oid::FLOAT4_ARRAY);
impl_numeric_array_element!(f64, oid::FLOAT8_ARRAY);

impl ArrayElement for bool {
    const ARRAY_OID: u32 = oid::BOOL_ARRAY;
    fn push_literal(&self, out: &mut String) {
        out.push(if *self { 't' } else { 'f' });
    }
}

impl ArrayElement for &str {
    const ARRAY_OID: u32 = oid::TEXT_ARRAY;
    fn push_literal(&self, out: &mut String) {
        push_quoted(self, out);
    }
}

impl ArrayElement for String {
    const ARRAY_OID: u32 = oid::TEXT_ARRAY;
    fn push_literal(&self, out: &mut String) {
        push_quoted(self.as_str(), out);
    }
}

impl<T: ArrayElement> ArrayElement for Option<T> {
    const ARRAY_OID: u32 = T::ARRAY_OID;
    fn push_literal(&self, out: &mut String) {
        match self {
            Some(v) => v.push_literal(out),
            None => out.push_str("NULL"),
        }
    }
}

/// Renders a slice as a PG array text literal: `{e1,e2,...}`.
pub fn format_pg_array<T: ArrayElement>(elems: &[T]) -> String {
    let mut out = String::with_capacity(2 + elems.len() * 4);
    out.push('{');
    for (i, e) in elems.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        e.push_literal(&mut out);
    }
    out.push('}');
    out
}

impl<T: ArrayElement> ToParam for Vec<T> {
    fn to_param(&self) -> Param {
        Param::text(format_pg_array(self), T::ARRAY_OID)
    }
}

impl<'a, T: ArrayElement> ToParam for &'a [T] {
    fn to_param(&self) -> Param {
        Param::text(format_pg_array(self), T::ARRAY_OID)
    }
}

impl<T: ArrayElement, const N: usize> ToParam for [T; N] {
    fn to_param(&self) -> Param {
        Param::text(format_pg_array(self), T::ARRAY_OID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_binary_encodings() {
        assert_eq!(true.to_param(), Param::binary(vec![1], oid::BOOL));
        assert_eq!(false.to_param(), Param::binary(vec![0], oid::BOOL));
        assert_eq!(7i16.to_param(), Param::binary(vec![0, 7], oid::INT2));
        assert_eq!(1i32.to_param(), Param::binary(vec![0, 0, 0, 1], oid::INT4));
        assert_eq!(
            (-1i64).to_param(),
            Param::binary(vec![0xff; 8], oid::INT8)
        );
        assert_eq!(
            1.5f64.to_param(),
            Param::binary(1.5f64.to_be_bytes().to_vec(), oid::FLOAT8)
        );
        assert_eq!(
            2.0f32.to_param(),
            Param::binary(2.0f32.to_be_bytes().to_vec(), oid::FLOAT4)
        );
    }

    #[test]
    fn test_text_and_null() {
        assert_eq!("John".to_param(), Param::text("John", 0));
        assert_eq!(Option::<i32>::None.to_param(), Param::null());
        assert_eq!(Some(5i32).to_param(), 5i32.to_param());
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(vec![1i32, 2, 3].to_param(), Param::text("{1,2,3}", oid::INT4_ARRAY));
        assert_eq!(
            vec![true, false].to_param(),
            Param::text("{t,f}", oid::BOOL_ARRAY)
        );
        assert_eq!(
            vec!["a\"b", "c\\d"].to_param(),
            Param::text(r#"{"a\"b","c\\d"}"#, oid::TEXT_ARRAY)
        );
        assert_eq!(
            vec![Some(1i64), None].to_param(),
            Param::text("{1,NULL}", oid::INT8_ARRAY)
        );
        assert_eq!(format_pg_array::<i16>(&[]), "{}");
    }

    #[test]
    fn test_tuple_expansion() {
        let params = collect_params(&("John", 1i32));
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Param::text("John", 0));
        assert_eq!(params[1], 1i32.to_param());

        // nested tuples flatten positionally
        let params = collect_params(&((1i16, 2i16), "x"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_json_params() {
        let v: serde_json::Value = serde_json::json!({"a": 1});
        assert_eq!(v.to_param().oid, oid::JSON);
        assert_eq!(Jsonb(v).to_param().oid, oid::JSONB);
    }
}
