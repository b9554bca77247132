use serde::{Deserialize, Serialize};
use std::fmt;

/// Network location of a camera's control endpoint. Two sessions target the same device
/// exactly when their addresses are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateControl {
    #[serde(rename = "FrameRateLimit")]
    pub frame_rate_limit: u32,
    #[serde(rename = "EncodingInterval")]
    pub encoding_interval: u32,
    #[serde(rename = "BitrateLimit")]
    pub bitrate_limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    #[serde(rename = "Width")]
    pub width: u32,
    #[serde(rename = "Height")]
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoEncoding {
    #[serde(rename = "Encoding")]
    pub encoding: String,
    #[serde(rename = "Resolution")]
    pub resolution: Resolution,
    #[serde(rename = "Quality")]
    pub quality: f64,
    #[serde(rename = "RateControl")]
    pub rate_control: RateControl,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioEncoding {
    #[serde(rename = "Encoding")]
    pub encoding: String,
    #[serde(rename = "Bitrate")]
    pub bitrate: u32,
    #[serde(rename = "SampleRate")]
    pub sample_rate: u32,
}

/// One named media configuration of the camera. Each profile maps to its own stream address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamProfile {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Video")]
    pub video: VideoEncoding,
    #[serde(rename = "Audio")]
    pub audio: Option<AudioEncoding>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PtzRange {
    #[serde(rename = "Min")]
    pub min: f32,
    #[serde(rename = "Max")]
    pub max: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PtzLimits {
    #[serde(rename = "Pan")]
    pub pan: PtzRange,
    #[serde(rename = "Tilt")]
    pub tilt: PtzRange,
    #[serde(rename = "Zoom")]
    pub zoom: PtzRange,
}

/// Everything read from the camera once, at connection time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceConfiguration {
    #[serde(rename = "Streams")]
    pub profiles: Vec<StreamProfile>,
    #[serde(rename = "PTZ")]
    pub ptz: PtzLimits,
}

impl DeviceConfiguration {
    pub fn profile(&self, name: &str) -> Option<&StreamProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PtzVector {
    #[serde(rename = "Pan")]
    pub pan: f32,
    #[serde(rename = "Tilt")]
    pub tilt: f32,
    #[serde(rename = "Zoom")]
    pub zoom: f32,
}

impl PtzVector {
    pub fn new(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self { pan, tilt, zoom }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtzSpeed {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl PtzSpeed {
    pub fn new(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self { pan, tilt, zoom }
    }
}

impl Default for PtzSpeed {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Current position and motion state, as reported by the camera.
///
/// The motion states are relayed verbatim (`IDLE`, `MOVING`, `UNKNOWN` on most devices).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PtzStatus {
    #[serde(rename = "Pan")]
    pub pan: f32,
    #[serde(rename = "Tilt")]
    pub tilt: f32,
    #[serde(rename = "Zoom")]
    pub zoom: f32,
    #[serde(rename = "PTMoving")]
    pub pan_tilt_state: String,
    #[serde(rename = "ZMoving")]
    pub zoom_state: String,
}

impl PtzStatus {
    pub fn is_moving(&self) -> bool {
        self.pan_tilt_state.eq_ignore_ascii_case("moving")
            || self.zoom_state.eq_ignore_ascii_case("moving")
    }

    pub fn moving(&self) -> MovingStatus {
        MovingStatus {
            moving: self.is_moving(),
            pan_tilt: self.pan_tilt_state.clone(),
            zoom: self.zoom_state.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingStatus {
    #[serde(rename = "Moving")]
    pub moving: bool,
    #[serde(rename = "PanTilt")]
    pub pan_tilt: String,
    #[serde(rename = "Zoom")]
    pub zoom: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtzPreset {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "PTZPosition")]
    pub position: PtzVector,
}
