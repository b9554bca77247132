//! Device command interface and its ONVIF implementation.
//!
//! The session engine only depends on the [`DeviceConnector`] and [`DeviceHandle`] traits;
//! [`OnvifConnector`] is the implementation wired in by the controller.

pub mod device_client;
pub mod onvif_client;
pub mod soap;
pub mod types;
pub mod xml;

pub use device_client::{embed_credentials, redact_uri, DeviceConnector, DeviceHandle};
pub use onvif_client::OnvifConnector;
pub use types::*;
