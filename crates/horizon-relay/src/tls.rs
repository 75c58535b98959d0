//! TLS settings for `wss://` relay connections.
//!
//! Connections are secured with rustls on the `ring` provider. Unless told
//! otherwise the client trusts the Mozilla root program shipped in
//! `webpki-roots`; a [`TlsConfig`] adds private roots, a client identity,
//! a protocol floor and ALPN ids on top of that, and is attached with
//! [`ClientConfig::tls_config`](crate::ClientConfig::tls_config).
//!
//! ```ignore
//! use horizon_relay::{ClientConfig, Certificate, Identity, TlsConfig};
//!
//! let tls = TlsConfig::new()
//!     .add_root_certificate(Certificate::from_pem_file("/etc/relay/ca.crt")?)
//!     .use_only_custom_roots()
//!     .identity(Identity::from_pem_files("client.crt", "client.key")?);
//! let config = ClientConfig::new("wss://relay.internal/socket").tls_config(tls);
//! ```

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion};

use horizon_relay_core::logging::targets;

use crate::error::{NetworkError, Result};

static TLS12_AND_UP: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Lowest protocol version the client will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    Tls1_2,
    Tls1_3,
}

impl TlsVersion {
    pub(crate) fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersion::Tls1_2 => TLS12_AND_UP,
            TlsVersion::Tls1_3 => TLS13_ONLY,
        }
    }
}

/// An ALPN id offered in the ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// `http/1.1`, which the WebSocket upgrade rides on.
    Http1,
    Custom(Vec<u8>),
}

impl AlpnProtocol {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AlpnProtocol::Http1 => b"http/1.1",
            AlpnProtocol::Custom(id) => id,
        }
    }
}

/// Everything a PEM blob held that the client cares about.
#[derive(Default)]
struct PemContents {
    certs: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
}

impl PemContents {
    fn parse(mut pem: &[u8]) -> Result<Self> {
        let mut contents = Self::default();
        for item in rustls_pemfile::read_all(&mut pem) {
            let item = item.map_err(|e| NetworkError::Tls(format!("malformed PEM: {e}")))?;
            match item {
                rustls_pemfile::Item::X509Certificate(cert) => contents.certs.push(cert),
                rustls_pemfile::Item::Pkcs1Key(key) => contents.set_key(key.into()),
                rustls_pemfile::Item::Pkcs8Key(key) => contents.set_key(key.into()),
                rustls_pemfile::Item::Sec1Key(key) => contents.set_key(key.into()),
                _ => {}
            }
        }
        Ok(contents)
    }

    // First key wins.
    fn set_key(&mut self, key: PrivateKeyDer<'static>) {
        self.key.get_or_insert(key);
    }

    fn require_certs(self) -> Result<Self> {
        if self.certs.is_empty() {
            return Err(NetworkError::Tls("PEM data holds no certificate".into()));
        }
        Ok(self)
    }
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| NetworkError::Tls(format!("cannot read {}: {e}", path.display())))
}

/// Root certificates to trust in addition to (or instead of) the bundled set.
#[derive(Clone)]
pub struct Certificate {
    certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Certificate").field(&self.certs.len()).finish()
    }
}

impl Certificate {
    /// Every certificate in a PEM blob. At least one is required.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Result<Self> {
        let contents = PemContents::parse(pem.as_ref())?.require_certs()?;
        Ok(Self {
            certs: contents.certs,
        })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(read_pem_file(path.as_ref())?)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Certificate chain plus private key presented for mutual TLS.
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Leaf certificate first, then intermediates. The key may be PKCS#1,
    /// PKCS#8 or SEC1.
    pub fn from_pem(chain_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self> {
        let chain = PemContents::parse(chain_pem.as_ref())?.require_certs()?.certs;
        let key = PemContents::parse(key_pem.as_ref())?
            .key
            .ok_or_else(|| NetworkError::Tls("PEM data holds no private key".into()))?;
        Ok(Self { chain, key })
    }

    pub fn from_pem_files(chain_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let chain_pem = read_pem_file(chain_path.as_ref())?;
        let key_pem = read_pem_file(key_path.as_ref())?;
        Self::from_pem(chain_pem, key_pem)
    }

}

/// TLS options for secure relay connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub extra_roots: Vec<Certificate>,
    /// Skip the bundled `webpki-roots` set.
    pub custom_roots_only: bool,
    pub identity: Option<Identity>,
    pub min_version: TlsVersion,
    pub alpn_protocols: Vec<AlpnProtocol>,
    /// Accept any server certificate. Never use outside tests.
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Trust only roots added with [`add_root_certificate`](Self::add_root_certificate).
    pub fn use_only_custom_roots(mut self) -> Self {
        self.custom_roots_only = true;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    pub fn alpn_protocol(mut self, protocol: AlpnProtocol) -> Self {
        self.alpn_protocols.push(protocol);
        self
    }

    /// Turn server certificate validation off. Handshake signatures are
    /// still checked, but anyone on the path can impersonate the relay.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Assemble the rustls client configuration used by the transport.
    pub fn build_rustls_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(self.min_version.protocol_versions())
            .map_err(|e| NetworkError::Tls(format!("unsupported protocol versions: {e}")))?;

        let builder = if self.danger_accept_invalid_certs {
            tracing::warn!(target: targets::TRANSPORT, "server certificate validation is off");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipChainValidation { provider }))
        } else {
            builder.with_root_certificates(self.root_store()?)
        };

        let mut config = match &self.identity {
            None => builder.with_no_client_auth(),
            Some(identity) => builder
                .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())
                .map_err(|e| NetworkError::Tls(format!("client identity rejected: {e}")))?,
        };
        config.alpn_protocols = self
            .alpn_protocols
            .iter()
            .map(|id| id.as_bytes().to_vec())
            .collect();

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut store = if self.custom_roots_only {
            RootCertStore::empty()
        } else {
            RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            }
        };

        for cert in self.extra_roots.iter().flat_map(|root| &root.certs) {
            store
                .add(cert.clone())
                .map_err(|e| NetworkError::Tls(format!("unusable root certificate: {e}")))?;
        }

        if store.is_empty() {
            return Err(NetworkError::Tls(
                "custom_roots_only is set but no root certificate was added".into(),
            ));
        }
        Ok(store)
    }
}

/// Accepts any certificate chain but still verifies handshake signatures
/// with the provider's algorithms.
#[derive(Debug)]
struct SkipChainValidation {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipChainValidation {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
