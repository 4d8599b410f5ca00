//! Non-blocking socket transport with optional TLS.
//!
//! All reads and writes are readiness-based: `try_read`/`try_write` return
//! Ok(0) for would-block, and the async `readable`/`writable` methods
//! suspend until the reactor signals the socket. A session owns its
//! transport exclusively, so no interior locking is needed.

use std::convert::TryFrom;
use std::io;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{
    Certificate, ClientConfig, ClientConnection, OwnedTrustAnchor, PrivateKey, RootCertStore,
    ServerName,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::aquifer::common::{Error, Result};
use crate::aquifer::config::{KeepaliveSettings, SslMode};
use crate::aquifer::pg::conninfo::Conninfo;

pub struct Transport {
    stream: TcpStream,
    tls: Option<ClientConnection>,
}

/// io::Read over the non-blocking socket for rustls' read_tls.
struct SockReader<'a>(&'a TcpStream);

impl io::Read for SockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

/// io::Write over the non-blocking socket for rustls' write_tls.
struct SockWriter<'a>(&'a TcpStream);

impl io::Write for SockWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Transport { stream, tls: None }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn readable(&self) -> Result<()> {
        self.stream.readable().await.map_err(Error::from)
    }

    pub async fn writable(&self) -> Result<()> {
        self.stream.writable().await.map_err(Error::from)
    }

    /// Reads without blocking. Ok(0) means would-block; EOF is an error
    /// (the remote closed the connection).
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(tls) = &mut self.tls {
            if tls.wants_read() {
                match tls.read_tls(&mut SockReader(&self.stream)) {
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!(%e, "TLS read error");
                        return Err(Error::from(e));
                    }
                    Ok(0) => {
                        info!("EOF reading from socket (remote end is closed)");
                        return Err(Error::closed());
                    }
                    Ok(_) => {
                        // Reading ciphertext might have yielded new TLS
                        // messages; errors here are protocol problems and fatal.
                        tls.process_new_packets().map_err(Error::from)?;
                    }
                }
            }
            return match io::Read::read(&mut tls.reader(), buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::closed()),
                Err(e) => Err(Error::from(e)),
            };
        }

        match self.stream.try_read(buf) {
            Ok(0) if !buf.is_empty() => Err(Error::closed()),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Writes without blocking. Ok(0) means would-block. For TLS the
    /// return value counts plaintext accepted, and pending ciphertext is
    /// flushed opportunistically first so buffering stays bounded.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize> {
        if let Some(tls) = &mut self.tls {
            Self::flush_tls(tls, &self.stream)?;
            if tls.wants_write() {
                // socket is backed up with ciphertext, don't take more
                return Ok(0);
            }
            let n = io::Write::write(&mut tls.writer(), buf).map_err(Error::from)?;
            Self::flush_tls(tls, &self.stream)?;
            return Ok(n);
        }

        match self.stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Pushes buffered ciphertext to the socket. Returns true when nothing
    /// is left pending (flush complete).
    pub fn try_flush(&mut self) -> Result<bool> {
        if let Some(tls) = &mut self.tls {
            Self::flush_tls(tls, &self.stream)?;
            Ok(!tls.wants_write())
        } else {
            // plain TCP writes go straight to the kernel
            Ok(true)
        }
    }

    fn flush_tls(tls: &mut ClientConnection, stream: &TcpStream) -> Result<()> {
        while tls.wants_write() {
            match tls.write_tls(&mut SockWriter(stream)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(%e, "TLS write error");
                    return Err(Error::from(e));
                }
            }
        }
        Ok(())
    }

    /// Runs the TLS handshake over the non-blocking socket and installs the
    /// session. The caller has already sent SSLRequest and seen 'S'.
    pub async fn upgrade(&mut self, config: Arc<ClientConfig>, server_name: &str) -> Result<()> {
        let name = ServerName::try_from(server_name)
            .map_err(|_| Error::new(format!("invalid server name {:?}", server_name)))?;
        let mut conn = ClientConnection::new(config, name).map_err(Error::from)?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                match conn.write_tls(&mut SockWriter(&self.stream)) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.stream.writable().await?;
                    }
                    Err(e) => return Err(Error::from(e)),
                }
            }
            if !conn.is_handshaking() {
                break;
            }
            self.stream.readable().await?;
            match conn.read_tls(&mut SockReader(&self.stream)) {
                Ok(0) => return Err(Error::closed()),
                Ok(_) => {
                    conn.process_new_packets().map_err(Error::from)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::from(e)),
            }
        }
        debug!("TLS handshake complete");
        self.tls = Some(conn);
        Ok(())
    }

    /// Shuts down the socket. Idempotent; errors are ignored because the
    /// peer may already be gone.
    pub fn close(&mut self) {
        #[cfg(unix)]
        unsafe {
            use std::os::unix::io::AsRawFd;
            libc::shutdown(self.stream.as_raw_fd(), libc::SHUT_RDWR);
        }
        self.tls = None;
    }
}

/// Applies TCP keepalive settings to the raw socket.
#[cfg(unix)]
pub fn apply_keepalive(stream: &TcpStream, ka: &KeepaliveSettings) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    if !ka.enabled {
        return Ok(());
    }
    let fd = stream.as_raw_fd();
    unsafe {
        set_opt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
        // the probe tuning knobs are Linux-only; elsewhere the OS defaults apply
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            set_opt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, ka.idle_seconds as libc::c_int)?;
            set_opt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_KEEPINTVL,
                ka.interval_seconds as libc::c_int,
            )?;
            set_opt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, ka.count as libc::c_int)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
unsafe fn set_opt(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<()> {
    let rc = libc::setsockopt(
        fd,
        level,
        name,
        &value as *const libc::c_int as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    );
    if rc != 0 {
        return Err(Error::from(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_keepalive(_stream: &TcpStream, _ka: &KeepaliveSettings) -> Result<()> {
    Ok(())
}

/// Accepts any server certificate. Used for sslmode allow/prefer/require,
/// which encrypt but don't authenticate, matching libpq.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Verifies the chain against the roots but tolerates a hostname mismatch.
/// This is sslmode=verify-ca: the CA is authenticated, the name is not.
struct CaOnlyVerifier {
    inner: WebPkiVerifier,
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        ) {
            Ok(v) => Ok(v),
            Err(rustls::Error::InvalidCertificateData(ref s))
                if s.contains("CertNotValidForName") =>
            {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }
}

fn load_root_store(sslrootcert: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    if sslrootcert.is_empty() {
        roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
    } else {
        let file = std::fs::File::open(sslrootcert)
            .map_err(|e| Error::new(format!("cannot open sslrootcert {:?}: {}", sslrootcert, e)))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .map_err(|e| Error::new(format!("cannot parse sslrootcert {:?}: {}", sslrootcert, e)))?;
        let (added, _skipped) = roots.add_parsable_certificates(&certs);
        if added == 0 {
            return Err(Error::new(format!(
                "no usable certificates in sslrootcert {:?}",
                sslrootcert
            )));
        }
    }
    Ok(roots)
}

fn load_client_cert(sslcert: &str, sslkey: &str) -> Result<(Vec<Certificate>, PrivateKey)> {
    let file = std::fs::File::open(sslcert)
        .map_err(|e| Error::new(format!("cannot open sslcert {:?}: {}", sslcert, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| Error::new(format!("cannot parse sslcert {:?}: {}", sslcert, e)))?
        .into_iter()
        .map(Certificate)
        .collect();

    let file = std::fs::File::open(sslkey)
        .map_err(|e| Error::new(format!("cannot open sslkey {:?}: {}", sslkey, e)))?;
    let mut reader = BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| Error::new(format!("cannot parse sslkey {:?}: {}", sslkey, e)))?;
    if keys.is_empty() {
        let file = std::fs::File::open(sslkey)?;
        keys = rustls_pemfile::rsa_private_keys(&mut BufReader::new(file))
            .map_err(|e| Error::new(format!("cannot parse sslkey {:?}: {}", sslkey, e)))?;
    }
    let key = keys
        .into_iter()
        .next()
        .ok_or_else(|| Error::new(format!("no private key found in sslkey {:?}", sslkey)))?;
    Ok((certs, PrivateKey(key)))
}

/// Builds the rustls client config for the given conninfo.
/// sslcrl is accepted for compatibility but revocation lists are not
/// enforced by this TLS backend.
pub fn build_tls_config(ci: &Conninfo) -> Result<Arc<ClientConfig>> {
    let mode = ci.sslmode();
    let builder = ClientConfig::builder().with_safe_defaults();

    let roots = match mode {
        SslMode::VerifyCa | SslMode::VerifyFull => {
            load_root_store(ci.get("sslrootcert").unwrap_or(""))?
        }
        _ => RootCertStore::empty(),
    };

    let mut config = match (ci.get("sslcert"), ci.get("sslkey")) {
        (Some(cert), Some(key)) if !cert.is_empty() => {
            let (certs, key) = load_client_cert(cert, key)?;
            builder
                .with_root_certificates(roots.clone())
                .with_single_cert(certs, key)
                .map_err(Error::from)?
        }
        _ => builder.with_root_certificates(roots.clone()).with_no_client_auth(),
    };

    match mode {
        SslMode::VerifyFull => {} // default webpki verification
        SslMode::VerifyCa => {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(CaOnlyVerifier {
                    inner: WebPkiVerifier::new(roots, None),
                }));
        }
        _ => {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCert));
        }
    }

    Ok(Arc::new(config))
}
