use crate::configuration::config::Config;
use crate::device_control::{DeviceConnector, OnvifConnector};
use crate::error_handling::types::*;
use crate::media_ingest::{default_transport, FfmpegDecoderFactory, MediaBackend};
use crate::session_management::{SessionRegistry, SessionSettings};
use crate::web_interface::WebServer;
use log::{debug, error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the session registry and the tasks serving it.
///
/// # Fields Overview
///
/// - `config`: validated runtime configuration
/// - `registry`: every live session
/// - `sweeper`: periodic reaping of terminated sessions, running while the controller runs
pub struct Controller {
    pub config: Config,
    registry: Arc<SessionRegistry>,
    sweeper: Option<JoinHandle<()>>,
}

impl Controller {
    /// Builds a controller talking ONVIF to cameras and decoding through FFmpeg.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config
            .validate()
            .map_err(ControllerError::ConfigurationError)?;
        let connector = Arc::new(OnvifConnector::new(config.device.request_timeout()));
        let media = MediaBackend::new(
            default_transport(),
            Arc::new(FfmpegDecoderFactory::new(config.decoder.ffmpeg_path.clone())),
        );
        Ok(Self::with_backend(config, connector, media))
    }

    /// Builds a controller around the given device connector and media backend.
    pub fn with_backend(
        config: Config,
        connector: Arc<dyn DeviceConnector>,
        media: MediaBackend,
    ) -> Self {
        let settings = SessionSettings::from(&config.session);
        let registry = Arc::new(SessionRegistry::new(connector, media, settings));
        Self {
            config,
            registry,
            sweeper: None,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Serves until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => {
                    error!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await
    }

    /// Serves until `shutdown` resolves, then closes every session.
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<(), ControllerError>
    where
        S: Future<Output = ()> + Send,
    {
        let addr = self
            .config
            .socket_addr()
            .map_err(ControllerError::ConfigurationError)?;
        let period = self.config.session.sweep_interval();
        debug!("Starting session sweeper ({:?})", period);
        self.sweeper = Some(self.registry.spawn_sweeper(period));

        let server = WebServer::new(
            self.registry.clone(),
            addr,
            self.config.server.cookie_max_age_secs,
        );
        let result = server
            .start(shutdown)
            .await
            .map_err(ControllerError::WebError);
        self.shutdown().await;
        result
    }

    pub async fn shutdown(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let closed = self.registry.shutdown_all().await;
        info!("Controller stopped, {} session(s) closed", closed);
    }
}
