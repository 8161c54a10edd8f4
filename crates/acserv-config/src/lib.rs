//! Gateway configuration file support
//!
//! The gateway is configured from a single YAML file describing the listen
//! addresses, the certificates to serve, the public directory and the
//! authentication/accounting backends.
//!
//! ```yaml
//! listen:
//!   - "0.0.0.0:443"
//! public_dir: ./public
//! certificates:
//!   - public: /etc/acserv/vpn.example.com.crt
//!     private: /etc/acserv/vpn.example.com.key
//!     addr: "0.0.0.0:443"
//! auth:
//!   office:
//!     type: radius
//!     nas_id: acserv
//!     server: "10.0.0.2:1812"
//!     secret: s3cret
//! default_auth: office
//! ```

pub mod backend;

pub use backend::{AccountingBackend, AuthBackend, RadiusSettings};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("No listen address configured")]
    NoListenAddress,

    #[error("No certificate configured")]
    NoCertificates,

    #[error("Duplicate address configured for certificates: {0}")]
    DuplicateCertificateAddress(SocketAddr),

    #[error("Unknown auth backend: {0}")]
    UnknownAuthBackend(String),

    #[error("Unknown accounting backend: {0}")]
    UnknownAccountingBackend(String),

    #[error("Invalid backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },
}

/// Certificate/key pair served by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSpec {
    /// PEM file holding the certificate chain (leaf first)
    pub public: PathBuf,

    /// PEM file holding the private key
    pub private: PathBuf,

    /// Listen address this certificate is bound to, used when the client
    /// sends no usable server name
    #[serde(default)]
    pub addr: Option<SocketAddr>,
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Addresses to accept TLS connections on
    #[serde(default)]
    pub listen: Vec<SocketAddr>,

    /// Root directory for static files
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Close client connections that stay idle for this many seconds
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default)]
    pub certificates: Vec<CertificateSpec>,

    /// Named authentication backends
    #[serde(default)]
    pub auth: BTreeMap<String, AuthBackend>,

    /// Named accounting backends
    #[serde(default)]
    pub accounting: BTreeMap<String, AccountingBackend>,

    #[serde(default)]
    pub default_auth: Option<String>,

    #[serde(default)]
    pub default_accounting: Option<String>,
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

impl GatewayConfig {
    /// Load and validate config from a file path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded config file {:?} ({} bytes)", path, content.len());
        Self::parse(&content)
    }

    /// Parse and validate config from a YAML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the gateway relies on at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::NoListenAddress);
        }

        if self.certificates.is_empty() {
            return Err(ConfigError::NoCertificates);
        }

        let mut bound = HashSet::new();
        for addr in self.certificates.iter().filter_map(|c| c.addr) {
            if !bound.insert(addr) {
                return Err(ConfigError::DuplicateCertificateAddress(addr));
            }
        }

        for (name, backend) in &self.auth {
            backend.validate(name)?;
        }
        for (name, backend) in &self.accounting {
            backend.validate(name)?;
        }

        if let Some(ref name) = self.default_auth {
            if !self.auth.contains_key(name) {
                return Err(ConfigError::UnknownAuthBackend(name.clone()));
            }
        }

        if let Some(ref name) = self.default_accounting {
            if !self.accounting.contains_key(name) {
                return Err(ConfigError::UnknownAccountingBackend(name.clone()));
            }
        }

        Ok(())
    }

    /// Idle deadline applied to client reads, if configured
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Generate a template config file content
    pub fn template() -> String {
        r#"# acserv gateway configuration

listen:
  - "0.0.0.0:443"

public_dir: ./public
# log_file: /var/log/acserv.log
# idle_timeout_secs: 300

certificates:
  - public: ./certs/server.crt
    private: ./certs/server.key
    # addr: "0.0.0.0:443"

# auth:
#   office:
#     type: radius
#     nas_id: acserv
#     server: "127.0.0.1:1812"
#     secret: change-me
#     timeout_secs: 5
#     retry: 3
# default_auth: office
"#
        .to_string()
    }
}
