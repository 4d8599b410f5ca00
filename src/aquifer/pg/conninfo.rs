//! libpq-style conninfo strings: space-separated `key=value` pairs with
//! single-quoted values where needed. This is the session driver's connect
//! interface; `Endpoint::to_conninfo` performs the ssl/keepalive/timeout
//! key injection.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

use crate::aquifer::common::{Error, Result};
use crate::aquifer::config::{Endpoint, SslMode};

/// An ordered set of conninfo key/value pairs. Later sets replace earlier
/// values; iteration order is stable for reproducible strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conninfo {
    pairs: Vec<(String, String)>,
}

impl Conninfo {
    pub fn new() -> Self {
        Conninfo::default()
    }

    /// Parse a conninfo string. Values may be single-quoted, with `\'`
    /// and `\\` escapes inside quotes.
    pub fn parse(s: &str) -> Result<Conninfo> {
        let mut out = Conninfo::new();
        let mut chars = s.chars().peekable();
        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                return Ok(out);
            }
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c.is_whitespace() {
                    break;
                }
                key.push(c);
                chars.next();
            }
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.next() != Some('=') {
                return Err(Error::new(format!(
                    "conninfo: missing '=' after key {:?}",
                    key
                )));
            }
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            let mut value = String::new();
            if chars.peek() == Some(&'\'') {
                chars.next();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(esc) => value.push(esc),
                            None => {
                                return Err(Error::new("conninfo: dangling escape in value"))
                            }
                        },
                        Some('\'') => break,
                        Some(c) => value.push(c),
                        None => return Err(Error::new("conninfo: unterminated quoted value")),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
            out.set(&key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets key to value, replacing any existing value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for pair in &mut self.pairs {
            if pair.0 == key {
                pair.1 = value;
                return;
            }
        }
        self.pairs.push((key.to_string(), value));
    }

    /// Sets key only if it has no value yet.
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) {
        if !self.contains(key) {
            self.set(key, value);
        }
    }

    pub fn host(&self) -> &str {
        self.get("host").unwrap_or("localhost")
    }

    pub fn hostaddr(&self) -> Option<&str> {
        self.get("hostaddr")
    }

    pub fn port(&self) -> u16 {
        self.get("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432)
    }

    pub fn user(&self) -> &str {
        self.get("user").unwrap_or("")
    }

    pub fn dbname(&self) -> &str {
        match self.get("dbname") {
            Some(db) => db,
            None => self.user(),
        }
    }

    pub fn password(&self) -> &str {
        self.get("password").unwrap_or("")
    }

    pub fn sslmode(&self) -> SslMode {
        self.get("sslmode")
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        let secs: u64 = self.get("connect_timeout")?.parse().ok()?;
        if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        }
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\')
}

impl Display for Conninfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.pairs {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if needs_quoting(v) {
                write!(f, "{}='", k)?;
                for c in v.chars() {
                    if c == '\'' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("'")?;
            } else {
                write!(f, "{}={}", k, v)?;
            }
        }
        Ok(())
    }
}

impl Endpoint {
    /// Renders this endpoint into a conninfo, injecting the ssl, keepalive
    /// and timeout keys the driver honors.
    ///
    /// When the host is an IP literal and `server_hostname` is set, both
    /// `hostaddr` and `host` are emitted so the address is dialed directly
    /// while certificate checks use the hostname. Keepalive keys are only
    /// emitted when keepalive is enabled, leaving OS defaults otherwise.
    pub fn to_conninfo(&self, connect_timeout: Option<Duration>) -> Conninfo {
        let mut ci = Conninfo::new();
        if self.host.parse::<IpAddr>().is_ok() && !self.server_hostname.is_empty() {
            ci.set("hostaddr", &self.host);
            ci.set("host", &self.server_hostname);
        } else {
            ci.set("host", &self.host);
        }
        ci.set("port", self.port.to_string());
        ci.set("user", &self.user);
        ci.set("dbname", &self.dbname);
        if !self.password.is_empty() {
            ci.set("password", &self.password);
        }
        ci.set("sslmode", self.sslmode.to_string());
        if !self.sslrootcert.is_empty() {
            ci.set("sslrootcert", &self.sslrootcert);
        }
        if !self.sslcert.is_empty() {
            ci.set("sslcert", &self.sslcert);
            ci.set("sslkey", &self.sslkey);
        }
        if !self.sslcrl.is_empty() {
            ci.set("sslcrl", &self.sslcrl);
        }
        if self.keepalive.enabled {
            ci.set("keepalives", "1");
            ci.set("keepalives_idle", self.keepalive.idle_seconds.to_string());
            ci.set(
                "keepalives_interval",
                self.keepalive.interval_seconds.to_string(),
            );
            ci.set("keepalives_count", self.keepalive.count.to_string());
        }
        if let Some(t) = connect_timeout {
            // seconds, rounded up, never below 1
            let secs = t.as_secs() + if t.subsec_nanos() > 0 { 1 } else { 0 };
            ci.set_default("connect_timeout", secs.max(1).to_string());
        }
        ci
    }
}
