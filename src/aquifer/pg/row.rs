//! Row-to-record mapping.
//!
//! Records implement `FromRow`, usually through the `impl_from_row!` macro
//! which generates both mapping strategies: by (normalized) column name, and
//! positional. `from_row` tries named mapping first and falls back to
//! positional, so a record works against `SELECT *` and against positional
//! projections alike. Tuples map positionally only.

use crate::aquifer::common::{Error, Result};
use crate::aquifer::pg::decode::FromCell;
use crate::aquifer::pg::protocol::Column;

/// A record constructible from one result row.
pub trait FromRow: Sized {
    /// Maps columns to fields by normalized name.
    /// Fails if any field has no matching column.
    fn from_row_named(row: &[Option<String>], columns: &[Column]) -> Result<Self>;

    /// Maps cell i to field i.
    fn from_row_positional(row: &[Option<String>], columns: &[Column]) -> Result<Self>;

    fn from_row(row: &[Option<String>], columns: &[Column]) -> Result<Self> {
        match Self::from_row_named(row, columns) {
            Ok(v) => Ok(v),
            Err(_) => Self::from_row_positional(row, columns),
        }
    }
}

/// Truncated preview of a cell value for error messages.
pub fn value_preview(cell: Option<&str>) -> String {
    match cell {
        None => "NULL".to_string(),
        Some(s) => {
            if s.chars().count() <= 80 {
                format!("{:?}", s)
            } else {
                let cut: String = s.chars().take(80).collect();
                format!("{:?}...", cut)
            }
        }
    }
}

/// Decodes the cell at `index` into `T`, wrapping failures with the
/// offending field, target type, source column and a value preview.
pub fn decode_field<T: FromCell>(
    row: &[Option<String>],
    columns: &[Column],
    index: usize,
    field: &str,
) -> Result<T> {
    let cell = match row.get(index) {
        Some(c) => c.as_deref(),
        None => {
            return Err(Error::new(format!(
                "row has {} cells, field `{}` (index {}) is out of range",
                row.len(),
                field,
                index
            )))
        }
    };
    T::from_cell(cell).map_err(|reason| {
        let col = columns
            .get(index)
            .map(|c| format!("{} (oid {})", c.name, c.type_oid))
            .unwrap_or_else(|| "?".to_string());
        Error::new(format!(
            "cannot decode field `{}` (index {}) as {}: {}; column={}, value={}",
            field,
            index,
            T::type_name(),
            reason,
            col,
            value_preview(cell)
        ))
    })
}

/// Finds the column index for a field by normalized name.
pub fn named_index(columns: &[Column], normalized_field: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.name_normalized == normalized_field)
}

/// Builds the named-mapping failure message listing what was missing.
pub fn named_mapping_error(missing: &[&str], columns: &[Column]) -> Error {
    let available: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    Error::new(format!(
        "not all fields matched by name: missing=[{}], available_cols=[{}]",
        missing.join(", "),
        available.join(", ")
    ))
}

/// Implements `FromRow` for a struct with the listed fields, all of which
/// must be `FromCell`. Example:
///
/// ```ignore
/// struct User { id: i64, name: String }
/// impl_from_row!(User { id, name });
/// ```
#[macro_export]
macro_rules! impl_from_row {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::FromRow for $ty {
            fn from_row_named(
                row: &[Option<String>],
                columns: &[$crate::Column],
            ) -> $crate::Result<Self> {
                let mut missing: Vec<&str> = Vec::new();
                $(
                    let $field = $crate::aquifer::pg::row::named_index(
                        columns,
                        &$crate::aquifer::common::normalize_ident(stringify!($field)),
                    );
                    if $field.is_none() {
                        missing.push(stringify!($field));
                    }
                )+
                if !missing.is_empty() {
                    return Err($crate::aquifer::pg::row::named_mapping_error(&missing, columns));
                }
                Ok($ty {
                    $(
                        $field: $crate::aquifer::pg::row::decode_field(
                            row,
                            columns,
                            $field.unwrap(),
                            stringify!($field),
                        )?,
                    )+
                })
            }

            #[allow(unused_assignments)]
            fn from_row_positional(
                row: &[Option<String>],
                columns: &[$crate::Column],
            ) -> $crate::Result<Self> {
                let mut index = 0usize;
                Ok($ty {
                    $(
                        $field: {
                            let v = $crate::aquifer::pg::row::decode_field(
                                row,
                                columns,
                                index,
                                stringify!($field),
                            )?;
                            index += 1;
                            v
                        },
                    )+
                })
            }
        }
    };
}

macro_rules! impl_from_row_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: FromCell),+> FromRow for ($($name,)+) {
            fn from_row_named(_row: &[Option<String>], _columns: &[Column]) -> Result<Self> {
                Err(Error::new("tuples map positionally, not by name"))
            }

            fn from_row_positional(row: &[Option<String>], columns: &[Column]) -> Result<Self> {
                Ok(($(
                    decode_field::<$name>(row, columns, $idx, stringify!($idx))?,
                )+))
            }

            fn from_row(row: &[Option<String>], columns: &[Column]) -> Result<Self> {
                Self::from_row_positional(row, columns)
            }
        }
    };
}

impl_from_row_tuple!(A: 0);
impl_from_row_tuple!(A: 0, B: 1);
impl_from_row_tuple!(A: 0, B: 1, C: 2);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<Column> {
        names.iter().map(|n| Column::new(n, 25)).collect()
    }

    fn row(cells: &[Option<&str>]) -> Vec<Option<String>> {
        cells.iter().map(|c| c.map(|s| s.to_string())).collect()
    }

    #[derive(Debug, PartialEq)]
    struct User {
        user_id: i64,
        name: String,
        active: bool,
    }
    impl_from_row!(User { user_id, name, active });

    #[test]
    fn test_named_mapping() {
        // columns out of field order, names in a different style
        let columns = cols(&["Name", "Active", "User ID"]);
        let r = row(&[Some("John"), Some("t"), Some("1")]);
        let u = User::from_row(&r, &columns).unwrap();
        assert_eq!(
            u,
            User {
                user_id: 1,
                name: "John".to_string(),
                active: true
            }
        );
    }

    #[test]
    fn test_named_mapping_missing_fields() {
        let columns = cols(&["name"]);
        let r = row(&[Some("John")]);
        let err = User::from_row_named(&r, &columns).unwrap_err().to_string();
        assert!(err.contains("not all fields matched by name"), "{}", err);
        assert!(err.contains("missing=[user_id, active]"), "{}", err);
        assert!(err.contains("available_cols=[name]"), "{}", err);
    }

    #[test]
    fn test_positional_fallback() {
        // column names that match nothing force the positional path
        let columns = cols(&["a", "b", "c"]);
        let r = row(&[Some("7"), Some("Jane"), Some("f")]);
        let u = User::from_row(&r, &columns).unwrap();
        assert_eq!(u.user_id, 7);
        assert_eq!(u.name, "Jane");
        assert!(!u.active);
    }

    #[test]
    fn test_tuple_positional() {
        let columns = cols(&["x", "y"]);
        let r = row(&[Some("1"), Some("two")]);
        let (a, b): (i32, String) = FromRow::from_row(&r, &columns).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "two");
    }

    #[test]
    fn test_decode_error_context() {
        let columns = cols(&["user_id", "name", "active"]);
        let r = row(&[Some("not-a-number"), Some("x"), Some("t")]);
        let err = User::from_row(&r, &columns).unwrap_err().to_string();
        assert!(err.contains("field `user_id`"), "{}", err);
        assert!(err.contains("index 0"), "{}", err);
        assert!(err.contains("\"not-a-number\""), "{}", err);
    }

    #[test]
    fn test_row_too_short_for_tuple() {
        let columns = cols(&["x"]);
        let r = row(&[Some("1")]);
        let res: Result<(i32, i32)> = FromRow::from_row(&r, &columns);
        assert!(res.is_err());
    }

    #[test]
    fn test_value_preview_truncates() {
        let long = "x".repeat(100);
        let p = value_preview(Some(&long));
        assert!(p.ends_with("\"..."));
        assert!(p.len() < 90);
        assert_eq!(value_preview(None), "NULL");
    }
}
