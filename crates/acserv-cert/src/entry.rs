//! A single configured certificate with its key and TLS server configuration

use acserv_config::CertificateSpec;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ServerConfig, SignatureScheme};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::CertError;

/// Certificate chain, signing key and optional bound listen address.
///
/// Immutable once loaded. Each entry carries its own rustls
/// [`ServerConfig`] so a connection only has to pick an entry after reading
/// the ClientHello.
pub struct CertificateEntry {
    names: Vec<String>,
    bind_addr: Option<SocketAddr>,
    certified_key: Arc<CertifiedKey>,
    server_config: Arc<ServerConfig>,
}

impl std::fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("names", &self.names)
            .field("bind_addr", &self.bind_addr)
            .field("chain_len", &self.certified_key.cert.len())
            .finish()
    }
}

impl CertificateEntry {
    /// Load a certificate/key pair from the PEM files named in the config
    pub fn load(spec: &CertificateSpec) -> Result<Self, CertError> {
        info!("Loading TLS certificate from: {}", spec.public.display());
        let cert_pem = read_file(&spec.public)?;

        info!("Loading TLS private key from: {}", spec.private.display());
        let key_pem = read_file(&spec.private)?;

        let chain = parse_chain(&cert_pem, &spec.public.display().to_string())?;
        let key = parse_private_key(&key_pem, &spec.private.display().to_string())?;

        Self::new(chain, key, spec.addr)
    }

    /// Build an entry from in-memory PEM data
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        bind_addr: Option<SocketAddr>,
    ) -> Result<Self, CertError> {
        let chain = parse_chain(cert_pem, "PEM input")?;
        let key = parse_private_key(key_pem, "PEM input")?;
        Self::new(chain, key, bind_addr)
    }

    /// Build an entry from a DER certificate chain (leaf first) and key
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        bind_addr: Option<SocketAddr>,
    ) -> Result<Self, CertError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CertError::NoCertificate("certificate chain".to_string()))?;
        let names = certificate_names(leaf)?;

        let signing_key = ring::sign::any_supported_type(&key)
            .map_err(|e| CertError::UnsupportedKey(e.to_string()))?;
        let certified_key = Arc::new(CertifiedKey::new(chain.clone(), signing_key));

        let mut server_config =
            ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(chain, key)?;
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        debug!(
            "Certificate loaded for names {:?} (bound to {:?})",
            names, bind_addr
        );

        Ok(Self {
            names,
            bind_addr,
            certified_key,
            server_config: Arc::new(server_config),
        })
    }

    /// DNS names from the leaf certificate (subject CN first, then SANs)
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.bind_addr
    }

    /// TLS configuration presenting this certificate
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }

    /// Whether this entry's key can sign with one of the offered schemes
    pub fn supports(&self, offered: &[SignatureScheme]) -> bool {
        self.certified_key.key.choose_scheme(offered).is_some()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CertError> {
    std::fs::read(path).map_err(|source| CertError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_chain(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let chain = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::InvalidCertificate(format!("Failed to parse certs: {}", e)))?;

    if chain.is_empty() {
        return Err(CertError::NoCertificate(origin.to_string()));
    }
    Ok(chain)
}

fn parse_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>, CertError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| CertError::UnsupportedKey(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| CertError::NoPrivateKey(origin.to_string()))
}

fn certificate_names(leaf: &CertificateDer<'_>) -> Result<Vec<String>, CertError> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref()).map_err(|e| {
        CertError::InvalidCertificate(format!("Failed to parse certificate: {}", e))
    })?;

    let mut names = Vec::new();
    for common_name in cert.subject().iter_common_name() {
        if let Ok(value) = common_name.as_str() {
            names.push(value.to_string());
        }
    }

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                names.push(dns.to_string());
            }
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(names: &[&str]) -> (String, String) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let certified = rcgen::generate_simple_self_signed(names).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn test_from_pem_reads_names() {
        let (cert, key) = generate(&["vpn.example.com", "*.corp.example.com"]);
        let entry = CertificateEntry::from_pem(cert.as_bytes(), key.as_bytes(), None).unwrap();

        assert!(entry.names().contains(&"vpn.example.com".to_string()));
        assert!(entry.names().contains(&"*.corp.example.com".to_string()));
        assert!(entry.bind_addr().is_none());
        assert_eq!(
            entry.server_config().alpn_protocols,
            vec![b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_supports_offered_schemes() {
        let (cert, key) = generate(&["vpn.example.com"]);
        let entry = CertificateEntry::from_pem(cert.as_bytes(), key.as_bytes(), None).unwrap();

        // rcgen defaults to ECDSA P-256
        assert!(entry.supports(&[SignatureScheme::ECDSA_NISTP256_SHA256]));
        assert!(!entry.supports(&[SignatureScheme::ED25519]));
        assert!(!entry.supports(&[]));
    }

    #[test]
    fn test_missing_key_rejected() {
        let (cert, _) = generate(&["vpn.example.com"]);
        let result = CertificateEntry::from_pem(cert.as_bytes(), b"", None);
        assert!(matches!(result, Err(CertError::NoPrivateKey(_))));
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let (_, key) = generate(&["vpn.example.com"]);
        let result = CertificateEntry::from_pem(b"not a pem", key.as_bytes(), None);
        assert!(matches!(result, Err(CertError::NoCertificate(_))));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = generate(&["vpn.example.com"]);
        let public = dir.path().join("server.crt");
        let private = dir.path().join("server.key");
        std::fs::write(&public, cert).unwrap();
        std::fs::write(&private, key).unwrap();

        let spec = CertificateSpec {
            public,
            private,
            addr: Some("127.0.0.1:8443".parse().unwrap()),
        };
        let entry = CertificateEntry::load(&spec).unwrap();
        assert_eq!(entry.bind_addr(), Some("127.0.0.1:8443".parse().unwrap()));
    }

    #[test]
    fn test_load_missing_file() {
        let spec = CertificateSpec {
            public: "/nonexistent/server.crt".into(),
            private: "/nonexistent/server.key".into(),
            addr: None,
        };
        assert!(matches!(
            CertificateEntry::load(&spec),
            Err(CertError::Read { .. })
        ));
    }
}
