//! Authentication and accounting backend settings
//!
//! Each backend kind carries its own typed settings and is selected by the
//! `type` tag in the YAML document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Settings shared by RADIUS authentication and accounting backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadiusSettings {
    /// NAS-Identifier sent with every request
    pub nas_id: String,

    /// RADIUS server address (host:port)
    pub server: String,

    /// Shared secret
    pub secret: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_radius_timeout")]
    pub timeout_secs: u64,

    /// Retransmissions before giving up
    #[serde(default)]
    pub retry: u32,
}

fn default_radius_timeout() -> u64 {
    5
}

impl RadiusSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBackend {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.server.trim().is_empty() {
            return Err(invalid("server must not be empty"));
        }
        if self.secret.is_empty() {
            return Err(invalid("secret must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

/// Authentication backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthBackend {
    Radius(RadiusSettings),
}

impl AuthBackend {
    /// Backend kind as written in the config file
    pub fn kind(&self) -> &'static str {
        match self {
            AuthBackend::Radius(_) => "radius",
        }
    }

    /// Address of the remote server backing this backend
    pub fn server(&self) -> &str {
        match self {
            AuthBackend::Radius(settings) => &settings.server,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self {
            AuthBackend::Radius(settings) => settings.validate(name),
        }
    }
}

/// Accounting backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccountingBackend {
    Radius(RadiusSettings),
}

impl AccountingBackend {
    /// Backend kind as written in the config file
    pub fn kind(&self) -> &'static str {
        match self {
            AccountingBackend::Radius(_) => "radius",
        }
    }

    /// Address of the remote server backing this backend
    pub fn server(&self) -> &str {
        match self {
            AccountingBackend::Radius(settings) => &settings.server,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self {
            AccountingBackend::Radius(settings) => settings.validate(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radius() -> RadiusSettings {
        RadiusSettings {
            nas_id: "acserv".to_string(),
            server: "127.0.0.1:1812".to_string(),
            secret: "secret".to_string(),
            timeout_secs: 3,
            retry: 1,
        }
    }

    #[test]
    fn test_auth_backend_tagged_yaml() {
        let backend = AuthBackend::Radius(radius());
        let yaml = serde_yaml::to_string(&backend).unwrap();
        assert!(yaml.contains("type: radius"));

        let parsed: AuthBackend = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, backend);
        assert_eq!(parsed.kind(), "radius");
        assert_eq!(parsed.server(), "127.0.0.1:1812");
    }

    #[test]
    fn test_missing_type_tag_rejected() {
        let yaml = "nas_id: acserv\nserver: 127.0.0.1:1812\nsecret: s\n";
        assert!(serde_yaml::from_str::<AccountingBackend>(yaml).is_err());
    }

    #[test]
    fn test_radius_validation() {
        assert!(radius().validate("office").is_ok());

        let mut empty_server = radius();
        empty_server.server = " ".to_string();
        assert!(matches!(
            empty_server.validate("office"),
            Err(ConfigError::InvalidBackend { name, .. }) if name == "office"
        ));

        let mut no_timeout = radius();
        no_timeout.timeout_secs = 0;
        assert!(no_timeout.validate("office").is_err());
    }
}
