use serde::{Deserialize, Serialize};

use crate::device_control::{PtzPreset, PtzSpeed, PtzVector};

/// JSON envelope of every API answer.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: &str, data: T) -> Self {
        Self {
            code: 200,
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn empty(code: u16, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerBanner {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionIdData {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub profile: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresetRequest {
    pub preset: String,
}

fn full_speed() -> f32 {
    1.0
}

/// Target or translation of a move, with per-axis speeds.
#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    #[serde(rename = "Pan", default)]
    pub pan: f32,
    #[serde(rename = "Tilt", default)]
    pub tilt: f32,
    #[serde(rename = "Zoom", default)]
    pub zoom: f32,
    #[serde(rename = "PanSpeed", default = "full_speed")]
    pub pan_speed: f32,
    #[serde(rename = "TiltSpeed", default = "full_speed")]
    pub tilt_speed: f32,
    #[serde(rename = "ZoomSpeed", default = "full_speed")]
    pub zoom_speed: f32,
}

impl PositionRequest {
    pub fn vector(&self) -> PtzVector {
        PtzVector::new(self.pan, self.tilt, self.zoom)
    }

    pub fn speed(&self) -> PtzSpeed {
        PtzSpeed::new(self.pan_speed, self.tilt_speed, self.zoom_speed)
    }
}

#[derive(Debug, Serialize)]
pub struct PresetList {
    #[serde(rename = "Presets")]
    pub presets: Vec<PtzPreset>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotData {
    pub w: u32,
    pub h: u32,
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct RestartData {
    pub restarted: bool,
}
