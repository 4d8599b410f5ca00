use crypto::digest::Digest;
use crypto::md5::Md5;

use crate::aquifer::common::{Error, Result};
use crate::aquifer::pg::protocol::{Message, Tag};

/// Authentication request variants the driver understands.
/// Anything else (GSS, SSPI, SASL, ...) is surfaced as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Unsupported(i32),
}

impl AuthRequest {
    pub fn parse(msg: &Message) -> Result<AuthRequest> {
        debug_assert_eq!(msg.tag(), Tag::AUTHENTICATION);
        let mut r = msg.reader();
        let code = r.read_i32();
        r.error()?;
        Ok(match code {
            0 => AuthRequest::Ok,
            3 => AuthRequest::CleartextPassword,
            5 => {
                let salt = r.read_bytes(4)?;
                AuthRequest::Md5Password {
                    salt: [salt[0], salt[1], salt[2], salt[3]],
                }
            }
            other => AuthRequest::Unsupported(other),
        })
    }
}

/// Construct the hex-encoded MD5 digest of user, password, and salt
/// per the PostgreSQL auth algorithm: md5(md5(password + user) + salt).
pub fn hash_md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.input_str(password);
    hasher.input_str(user);
    let mut pwd_hash = [0; 16];
    hasher.result(&mut pwd_hash);
    hasher.reset();
    hasher.input_str(&hex::encode(&pwd_hash[..]));
    hasher.input(&salt[..]);
    hasher.result(&mut pwd_hash);

    let mut result = String::with_capacity(32 + 3);
    result.push_str("md5");
    result.push_str(&hex::encode(&pwd_hash[..]));
    result
}

/// Error text for an unsupported auth request, named so callers produce
/// the same wording everywhere.
pub fn unsupported_auth_error(code: i32) -> Error {
    Error::new(format!("unsupported authentication request (code {})", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_md5_password() {
        assert_eq!(
            hash_md5_password("username", "foobar", &0xa26892c4u32.to_be_bytes()),
            "md57b4e445f6041af0d6d962d0cbd830f18"
        );
        assert_eq!(
            hash_md5_password("md5_user", "password", &0x2a3d8fe0u32.to_be_bytes()),
            "md562af4dd09bbb41884907a838a3233294"
        );
    }
}
