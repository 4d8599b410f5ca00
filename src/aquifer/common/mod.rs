mod errors;

pub use self::errors::{Error, ErrorKind, Result};

/// Normalize a SQL identifier for case- and separator-insensitive matching:
/// ASCII letters lowercased, digits and underscores kept, runs of underscores
/// collapsed, everything else dropped. Idempotent.
pub fn normalize_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_underscore = false;
    for c in s.chars() {
        let c = match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            'a'..='z' | '0'..='9' => c,
            '_' => {
                if last_underscore {
                    continue;
                }
                last_underscore = true;
                out.push('_');
                continue;
            }
            _ => continue,
        };
        last_underscore = false;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ident() {
        assert_eq!(normalize_ident("UserName"), "username");
        assert_eq!(normalize_ident("user__name"), "user_name");
        assert_eq!(normalize_ident("user-name!"), "username");
        assert_eq!(normalize_ident("__a__b__"), "_a_b_");
        assert_eq!(normalize_ident("id2"), "id2");
    }

    #[test]
    fn test_normalize_ident_idempotent() {
        for s in ["UserName", "user__name", "a-b_c", "", "___"] {
            let once = normalize_ident(s);
            assert_eq!(normalize_ident(&once), once);
        }
    }
}
