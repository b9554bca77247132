use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;

use super::handlers::Handlers;
use super::routes::api_routes;
use crate::error_handling::types::WebError;
use crate::session_management::SessionRegistry;

/// HTTP front-end of the session registry
pub struct WebServer {
    handlers: Handlers,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(registry: Arc<SessionRegistry>, addr: SocketAddr, cookie_max_age_secs: u64) -> Self {
        Self {
            handlers: Handlers::new(registry, cookie_max_age_secs),
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves the API until `shutdown` resolves.
    pub async fn start<S>(&self, shutdown: S) -> Result<(), WebError>
    where
        S: Future<Output = ()> + Send,
    {
        // warp aborts on bind errors, probe the address first
        let probe = TcpListener::bind(self.addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", self.addr, e)))?;
        drop(probe);

        let routes = api_routes(self.handlers.clone());
        info!("Web interface listening on http://{}", self.addr);
        tokio::select! {
            _ = warp::serve(routes).run(self.addr) => {}
            _ = shutdown => info!("Web interface stopped"),
        }
        Ok(())
    }
}
