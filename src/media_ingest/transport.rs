use super::types::{AccessUnit, CodecParameters};
use crate::error_handling::types::IngestError;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens media connections to stream addresses.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// `uri` may carry credentials in its user info.
    async fn connect(&self, uri: &str) -> Result<Box<dyn MediaConnection>, IngestError>;
}

/// One open media session with a camera. Dropping it releases the connection.
#[async_trait]
pub trait MediaConnection: Send {
    /// Video codecs advertised by the stream description, in track order.
    fn offered_codecs(&self) -> Vec<CodecParameters>;

    /// Starts delivery of the track described by `codec`.
    async fn start(&mut self, codec: &CodecParameters) -> Result<(), IngestError>;

    /// Next access unit of the started track, `None` once the stream ended.
    ///
    /// Must be cancel-safe: the ingest task races it against its stop check and drops the
    /// future when a stop is requested.
    async fn next_access_unit(&mut self) -> Result<Option<AccessUnit>, IngestError>;
}

/// Stand-in used when the binary was built without RTSP support.
pub struct UnavailableTransport;

#[async_trait]
impl MediaTransport for UnavailableTransport {
    async fn connect(&self, _uri: &str) -> Result<Box<dyn MediaConnection>, IngestError> {
        Err(IngestError::TransportFailure(String::from(
            "RTSP support is not compiled in (enable the `rtsp` feature)",
        )))
    }
}

/// Transport used by the server binary.
pub fn default_transport() -> Arc<dyn MediaTransport> {
    #[cfg(feature = "rtsp")]
    {
        Arc::new(super::rtsp_transport::RtspTransport::new())
    }
    #[cfg(not(feature = "rtsp"))]
    {
        Arc::new(UnavailableTransport)
    }
}
