//! Startup helpers.
//!
//! # Responsibilities
//! - Decide which port to listen on
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: a bind error is returned to the caller, never retried

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::config::ConfigSnapshot;

/// Port used when neither the caller nor the configuration names one.
pub const DEFAULT_PORT: u16 = 3000;

/// Explicit port, else the configured port, else `DEFAULT_PORT`.
pub fn resolve_port(explicit: Option<u16>, config: &ConfigSnapshot) -> u16 {
    explicit.or_else(|| config.port()).unwrap_or(DEFAULT_PORT)
}

/// Bind on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener, std::io::Error> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::config::ConfigPatch;

    #[test]
    fn test_port_resolution_order() {
        let mut app = App::new();
        assert_eq!(resolve_port(None, app.config()), DEFAULT_PORT);

        app.apply_config(ConfigPatch::new().port("8080")).unwrap();
        assert_eq!(resolve_port(None, app.config()), 8080);
        assert_eq!(resolve_port(Some(9000), app.config()), 9000);

        app.apply_config(ConfigPatch::new().port(false)).unwrap();
        assert_eq!(resolve_port(None, app.config()), DEFAULT_PORT);
    }
}
