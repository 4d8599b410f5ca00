//! Text-format cell decoding: scalar parsing and PG array literals.
//!
//! Decode failures return plain reason strings; the row mapper wraps them
//! with field/column context before they reach the caller.

/// A value decodable from one text cell of a result row.
pub trait FromCell: Sized {
    /// Decode from a non-NULL text cell.
    fn from_text(s: &str) -> Result<Self, String>;

    /// Value produced for a SQL NULL cell or a NULL array element.
    fn from_null() -> Result<Self, String>;

    fn from_cell(cell: Option<&str>) -> Result<Self, String> {
        match cell {
            Some(s) => Self::from_text(s),
            None => Self::from_null(),
        }
    }

    /// Name used in decode error messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl FromCell for String {
    fn from_text(s: &str) -> Result<Self, String> {
        Ok(s.to_string())
    }

    fn from_null() -> Result<Self, String> {
        Ok(String::new())
    }
}

impl FromCell for bool {
    fn from_text(s: &str) -> Result<Self, String> {
        match s {
            "t" | "true" | "1" => Ok(true),
            "f" | "false" | "0" => Ok(false),
            _ => Err(format!("not a boolean: {:?}", s)),
        }
    }

    fn from_null() -> Result<Self, String> {
        Ok(false)
    }
}

macro_rules! impl_from_cell_parse {
    ($ty:ty, $what:expr) => {
        impl FromCell for $ty {
            fn from_text(s: &str) -> Result<Self, String> {
                // str::parse requires the whole string to be consumed
                s.parse::<$ty>()
                    .map_err(|e| format!("not {}: {:?} ({})", $what, s, e))
            }

            fn from_null() -> Result<Self, String> {
                Ok(Default::default())
            }
        }
    };
}

impl_from_cell_parse!(i16, "a 16-bit integer");
impl_from_cell_parse!(i32, "a 32-bit integer");
impl_from_cell_parse!(i64, "a 64-bit integer");
impl_from_cell_parse!(f32, "a 32-bit float");
impl_from_cell_parse!(f64, "a 64-bit float");

impl<T: FromCell> FromCell for Option<T> {
    fn from_text(s: &str) -> Result<Self, String> {
        // an empty cell decodes to None, mirroring the encoder's
        // empty-optional-is-NULL rule
        if s.is_empty() {
            Ok(None)
        } else {
            T::from_text(s).map(Some)
        }
    }

    fn from_null() -> Result<Self, String> {
        Ok(None)
    }
}

impl<T: FromCell> FromCell for Vec<T> {
    fn from_text(s: &str) -> Result<Self, String> {
        let elems = parse_pg_array(s)?;
        let mut out = Vec::with_capacity(elems.len());
        for (i, elem) in elems.into_iter().enumerate() {
            let v = T::from_cell(elem.as_deref())
                .map_err(|e| format!("array element {}: {}", i, e))?;
            out.push(v);
        }
        Ok(out)
    }

    fn from_null() -> Result<Self, String> {
        Ok(Vec::new())
    }
}

/// Splits a PG array text literal into elements. None = the NULL token.
/// Handles quoted elements with `""` and `\x` escapes, and leaves nested
/// array literals intact for the recursing element decoder.
pub fn parse_pg_array(s: &str) -> Result<Vec<Option<String>>, String> {
    let inner = s
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| format!("array literal must be braced: {:?}", s))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }

    let mut elems = Vec::new();
    let mut cur = String::new();
    let mut quoted = false; // the current element was quoted
    let mut in_quotes = false;
    let mut depth = 0u32; // nested array braces
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '\\' => {
                    // backslash escapes the next character verbatim
                    match chars.next() {
                        Some(esc) => cur.push(esc),
                        None => return Err(format!("dangling escape in array literal: {:?}", s)),
                    }
                }
                '"' => {
                    if chars.peek() == Some(&'"') {
                        // doubled quote inside a quoted element
                        chars.next();
                        cur.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cur.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                quoted = true;
            }
            '{' => {
                depth += 1;
                cur.push(c);
            }
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced braces in array literal: {:?}", s))?;
                cur.push(c);
            }
            ',' if depth == 0 => {
                elems.push(finish_element(std::mem::take(&mut cur), quoted));
                quoted = false;
            }
            _ => cur.push(c),
        }
    }
    if in_quotes || depth != 0 {
        return Err(format!("unterminated array literal: {:?}", s));
    }
    elems.push(finish_element(cur, quoted));
    Ok(elems)
}

fn finish_element(value: String, quoted: bool) -> Option<String> {
    // only an unquoted NULL token means NULL; "NULL" is the string
    if !quoted && value == "NULL" {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(i32::from_text("42"), Ok(42));
        assert!(i32::from_text("42x").is_err());
        assert!(i32::from_text(" 42").is_err());
        assert_eq!(bool::from_text("t"), Ok(true));
        assert_eq!(bool::from_text("false"), Ok(false));
        assert!(bool::from_text("yes").is_err());
        assert_eq!(f64::from_text("1.5"), Ok(1.5));
        assert_eq!(String::from_text("a b"), Ok("a b".to_string()));
    }

    #[test]
    fn test_option() {
        assert_eq!(Option::<i32>::from_cell(None), Ok(None));
        assert_eq!(Option::<i32>::from_cell(Some("")), Ok(None));
        assert_eq!(Option::<i32>::from_cell(Some("3")), Ok(Some(3)));
    }

    #[test]
    fn test_parse_pg_array() {
        assert_eq!(
            parse_pg_array("{1,2,3}").unwrap(),
            vec![Some("1".into()), Some("2".into()), Some("3".into())]
        );
        assert_eq!(parse_pg_array("{}").unwrap(), Vec::<Option<String>>::new());
        assert_eq!(
            parse_pg_array(r#"{"a,b",NULL,"NULL"}"#).unwrap(),
            vec![Some("a,b".into()), None, Some("NULL".into())]
        );
        assert_eq!(
            parse_pg_array(r#"{"say \"hi\"","back\\slash"}"#).unwrap(),
            vec![Some(r#"say "hi""#.into()), Some(r"back\slash".into())]
        );
        assert!(parse_pg_array("1,2").is_err());
        assert!(parse_pg_array("{\"unterminated}").is_err());
    }

    #[test]
    fn test_decode_vec() {
        assert_eq!(Vec::<i32>::from_text("{1,2,3}"), Ok(vec![1, 2, 3]));
        assert_eq!(
            Vec::<Option<i32>>::from_text("{1,NULL}"),
            Ok(vec![Some(1), None])
        );
        // NULL element decodes to the element default
        assert_eq!(Vec::<i32>::from_text("{NULL,2}"), Ok(vec![0, 2]));
        assert_eq!(
            Vec::<String>::from_text(r#"{"a","b c"}"#),
            Ok(vec!["a".to_string(), "b c".to_string()])
        );
        assert!(Vec::<i32>::from_text("{1,x}").is_err());
    }

    #[test]
    fn test_nested_array() {
        assert_eq!(
            parse_pg_array("{{1,2},{3,4}}").unwrap(),
            vec![Some("{1,2}".into()), Some("{3,4}".into())]
        );
        assert_eq!(
            Vec::<Vec<i32>>::from_text("{{1,2},{3,4}}"),
            Ok(vec![vec![1, 2], vec![3, 4]])
        );
    }

    #[test]
    fn test_roundtrip_with_encoder() {
        use crate::aquifer::pg::params::format_pg_array;
        let vs = vec!["plain".to_string(), "with \"q\"".to_string(), "a,b".to_string()];
        let literal = format_pg_array(&vs);
        assert_eq!(Vec::<String>::from_text(&literal), Ok(vs));

        let ns = vec![1i64, -5, 0];
        assert_eq!(Vec::<i64>::from_text(&format_pg_array(&ns)), Ok(ns));
    }
}
