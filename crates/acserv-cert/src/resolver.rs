//! Certificate selection for incoming TLS handshakes

use acserv_config::CertificateSpec;
use rustls::SignatureScheme;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{CertError, CertificateEntry};

/// The parts of a ClientHello that drive certificate selection
#[derive(Debug, Clone, Copy)]
pub struct ClientHelloInfo<'a> {
    /// SNI host name, if the client sent one
    pub server_name: Option<&'a str>,
    /// Signature schemes offered by the client
    pub signature_schemes: &'a [SignatureScheme],
}

/// Which resolution step picked the certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Single,
    ExactName,
    WildcardName,
    LocalAddress,
    Compatible,
    Default,
}

/// Result of a resolution
#[derive(Debug, Clone)]
pub struct Selection {
    pub entry: Arc<CertificateEntry>,
    pub matched_by: MatchedBy,
}

/// Maps a handshake to one of the configured certificates.
///
/// Built once and never mutated, so it is shared between connections as a
/// plain `Arc` without locking.
#[derive(Debug)]
pub struct CertificateResolver {
    entries: Vec<Arc<CertificateEntry>>,
    exact: HashMap<String, usize>,
    wildcard: HashMap<String, usize>,
    by_addr: HashMap<SocketAddr, usize>,
}

impl CertificateResolver {
    /// Load every configured certificate and build the index
    pub fn load(specs: &[CertificateSpec]) -> Result<Self, CertError> {
        let entries = specs
            .iter()
            .map(CertificateEntry::load)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Build the index over already loaded entries, in registration order
    pub fn new(entries: Vec<CertificateEntry>) -> Result<Self, CertError> {
        if entries.is_empty() {
            return Err(CertError::NoCertificates);
        }

        let mut exact: HashMap<String, usize> = HashMap::new();
        let mut wildcard: HashMap<String, usize> = HashMap::new();
        let mut by_addr: HashMap<SocketAddr, usize> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            if let Some(addr) = entry.bind_addr() {
                if by_addr.insert(addr, index).is_some() {
                    return Err(CertError::DuplicateAddress(addr));
                }
            }

            for name in entry.names() {
                let name = name.to_ascii_lowercase();
                let map = if name.starts_with("*.") {
                    &mut wildcard
                } else {
                    &mut exact
                };
                if let Some(&existing) = map.get(&name) {
                    warn!(
                        "Certificate name {} already registered by certificate #{}, ignoring duplicate from #{}",
                        name, existing, index
                    );
                    continue;
                }
                map.insert(name, index);
            }
        }

        debug!(
            "Certificate index built: {} certificates, {} exact names, {} wildcard names, {} bound addresses",
            entries.len(),
            exact.len(),
            wildcard.len(),
            by_addr.len()
        );

        Ok(Self {
            entries: entries.into_iter().map(Arc::new).collect(),
            exact,
            wildcard,
            by_addr,
        })
    }

    pub fn entries(&self) -> &[Arc<CertificateEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the certificate for a handshake. Never fails.
    pub fn select(&self, hello: &ClientHelloInfo<'_>, local_addr: Option<SocketAddr>) -> Selection {
        if self.entries.len() == 1 {
            return self.selection(0, MatchedBy::Single);
        }

        if let Some(name) = hello.server_name.filter(|n| !n.is_empty()) {
            let name = name.trim_end_matches('.').to_ascii_lowercase();

            if let Some(&index) = self.exact.get(&name) {
                return self.selection(index, MatchedBy::ExactName);
            }

            if let Some(pattern) = wildcard_for(&name) {
                if let Some(&index) = self.wildcard.get(&pattern) {
                    return self.selection(index, MatchedBy::WildcardName);
                }
            }
        }

        if let Some(index) = local_addr.and_then(|addr| self.index_for_addr(addr)) {
            return self.selection(index, MatchedBy::LocalAddress);
        }

        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.supports(hello.signature_schemes))
        {
            return self.selection(index, MatchedBy::Compatible);
        }

        self.selection(0, MatchedBy::Default)
    }

    fn index_for_addr(&self, addr: SocketAddr) -> Option<usize> {
        if let Some(&index) = self.by_addr.get(&addr) {
            return Some(index);
        }

        // Entries bound to 0.0.0.0 / [::] match any local IP on their port
        self.by_addr
            .iter()
            .filter(|(bound, _)| bound.ip().is_unspecified() && bound.port() == addr.port())
            .map(|(_, &index)| index)
            .min()
    }

    fn selection(&self, index: usize, matched_by: MatchedBy) -> Selection {
        Selection {
            entry: self.entries[index].clone(),
            matched_by,
        }
    }
}

/// `foo.example.com` -> `*.example.com`, a single label -> `*`
fn wildcard_for(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    match name.split_once('.') {
        Some((_, rest)) => Some(format!("*.{}", rest)),
        None => Some("*".to_string()),
    }
}
