//! Everything a listener needs, built once at startup

use acserv_cert::CertificateResolver;
use acserv_config::GatewayConfig;
use acserv_http::{RequestLimits, RouteTable};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::{ServerError, TunnelProfile};

/// Per-connection settings
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub limits: RequestLimits,
    pub tunnel: TunnelProfile,
}

/// Immutable state shared by all listeners and connections
#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub listen: Vec<SocketAddr>,
    pub resolver: Arc<CertificateResolver>,
    pub routes: Arc<RouteTable>,
    pub options: Arc<ConnectionOptions>,
}

impl GatewayContext {
    pub fn new(
        listen: Vec<SocketAddr>,
        resolver: CertificateResolver,
        routes: RouteTable,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            listen,
            resolver: Arc::new(resolver),
            routes: Arc::new(routes),
            options: Arc::new(options),
        }
    }

    /// Load certificates and build routes from a validated config
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let resolver = CertificateResolver::load(&config.certificates)?;
        info!("Loaded {} certificate(s)", resolver.len());

        let routes = RouteTable::new(&config.public_dir);
        info!("Serving static files from {}", config.public_dir.display());

        let options = ConnectionOptions {
            limits: RequestLimits {
                idle_timeout: config.idle_timeout(),
                ..Default::default()
            },
            tunnel: TunnelProfile::default(),
        };

        Ok(Self::new(config.listen.clone(), resolver, routes, options))
    }
}
