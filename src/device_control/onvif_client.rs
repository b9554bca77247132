//! ONVIF implementation of the device command interface.
//!
//! Only the handful of operations the server relays are implemented: capability discovery,
//! media profiles and stream addresses, and the PTZ service (status, presets, moves, stop).

use super::device_client::{DeviceConnector, DeviceHandle};
use super::soap::{SoapClient, MEDIA_NS, PTZ_NS, DEVICE_NS};
use super::types::*;
use super::xml::{self, Element};
use crate::error_handling::types::DeviceError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Connects to cameras over ONVIF.
pub struct OnvifConnector {
    request_timeout: Duration,
}

impl OnvifConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl DeviceConnector for OnvifConnector {
    async fn connect(
        &self,
        address: &DeviceAddress,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>, DeviceError> {
        let device = OnvifDevice::connect(address, credentials, self.request_timeout).await?;
        Ok(Arc::new(device))
    }
}

/// Service endpoints discovered through `GetCapabilities`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEndpoints {
    pub media: String,
    pub ptz: Option<String>,
}

pub struct OnvifDevice {
    soap: SoapClient,
    endpoints: ServiceEndpoints,
    configuration: DeviceConfiguration,
}

impl OnvifDevice {
    pub async fn connect(
        address: &DeviceAddress,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let soap = SoapClient::new(credentials.clone(), timeout)?;
        let device_url = format!("http://{}/onvif/device_service", address);

        debug!("Querying capabilities of {}", address);
        let response = soap
            .call(
                &device_url,
                &format!(
                    r#"<GetCapabilities xmlns="{}"><Category>All</Category></GetCapabilities>"#,
                    DEVICE_NS
                ),
            )
            .await?;
        let endpoints = parse_capabilities(&response, &device_url);

        let response = soap
            .call(&endpoints.media, &format!(r#"<GetProfiles xmlns="{}"/>"#, MEDIA_NS))
            .await?;
        let profiles = parse_profiles(&response)?;
        if profiles.is_empty() {
            return Err(DeviceError::MalformedResponse(String::from(
                "device reported no media profile",
            )));
        }

        let ptz = match &endpoints.ptz {
            Some(ptz_url) => {
                let body = format!(r#"<GetConfigurations xmlns="{}"/>"#, PTZ_NS);
                match soap.call(ptz_url, &body).await.and_then(|r| parse_ptz_limits(&r)) {
                    Ok(limits) => limits,
                    Err(e) => {
                        warn!("PTZ configuration of {} unavailable: {}", address, e);
                        PtzLimits::default()
                    }
                }
            }
            None => PtzLimits::default(),
        };

        info!(
            "Connected to {} ({} profile(s), ptz: {})",
            address,
            profiles.len(),
            endpoints.ptz.is_some()
        );

        Ok(Self {
            soap,
            endpoints,
            configuration: DeviceConfiguration { profiles, ptz },
        })
    }

    fn token(&self, profile: &str) -> Result<&str, DeviceError> {
        self.configuration
            .profile(profile)
            .map(|p| p.token.as_str())
            .ok_or_else(|| DeviceError::UnknownProfile(profile.to_string()))
    }

    fn ptz_url(&self) -> Result<&str, DeviceError> {
        self.endpoints
            .ptz
            .as_deref()
            .ok_or_else(|| DeviceError::Unsupported(String::from("PTZ service")))
    }

    async fn ptz_call(&self, body: String) -> Result<String, DeviceError> {
        let url = self.ptz_url()?;
        self.soap.call(url, &body).await
    }
}

#[async_trait]
impl DeviceHandle for OnvifDevice {
    fn configuration(&self) -> &DeviceConfiguration {
        &self.configuration
    }

    async fn resolve_stream_address(&self, profile: &str) -> Result<String, DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<GetStreamUri xmlns="{}"><StreamSetup><tt:Stream>RTP-Unicast</tt:Stream><tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport></StreamSetup><ProfileToken>{}</ProfileToken></GetStreamUri>"#,
            MEDIA_NS,
            xml::escape(token)
        );
        let response = self.soap.call(&self.endpoints.media, &body).await?;
        parse_stream_uri(&response)
    }

    async fn get_status(&self, profile: &str) -> Result<PtzStatus, DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<GetStatus xmlns="{}"><ProfileToken>{}</ProfileToken></GetStatus>"#,
            PTZ_NS,
            xml::escape(token)
        );
        parse_status(&self.ptz_call(body).await?)
    }

    async fn get_presets(&self, profile: &str) -> Result<Vec<PtzPreset>, DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<GetPresets xmlns="{}"><ProfileToken>{}</ProfileToken></GetPresets>"#,
            PTZ_NS,
            xml::escape(token)
        );
        parse_presets(&self.ptz_call(body).await?)
    }

    async fn goto_preset(&self, profile: &str, preset: &str) -> Result<(), DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<GotoPreset xmlns="{}"><ProfileToken>{}</ProfileToken><PresetToken>{}</PresetToken></GotoPreset>"#,
            PTZ_NS,
            xml::escape(token),
            xml::escape(preset)
        );
        self.ptz_call(body).await.map(|_| ())
    }

    async fn absolute_move(
        &self,
        profile: &str,
        position: PtzVector,
        speed: PtzSpeed,
    ) -> Result<(), DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<AbsoluteMove xmlns="{}"><ProfileToken>{}</ProfileToken><Position>{}</Position><Speed>{}</Speed></AbsoluteMove>"#,
            PTZ_NS,
            xml::escape(token),
            vector_xml(&position),
            speed_xml(&speed)
        );
        self.ptz_call(body).await.map(|_| ())
    }

    async fn relative_move(
        &self,
        profile: &str,
        translation: PtzVector,
        speed: PtzSpeed,
    ) -> Result<(), DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<RelativeMove xmlns="{}"><ProfileToken>{}</ProfileToken><Translation>{}</Translation><Speed>{}</Speed></RelativeMove>"#,
            PTZ_NS,
            xml::escape(token),
            vector_xml(&translation),
            speed_xml(&speed)
        );
        self.ptz_call(body).await.map(|_| ())
    }

    async fn stop(&self, profile: &str) -> Result<(), DeviceError> {
        let token = self.token(profile)?;
        let body = format!(
            r#"<Stop xmlns="{}"><ProfileToken>{}</ProfileToken><PanTilt>true</PanTilt><Zoom>true</Zoom></Stop>"#,
            PTZ_NS,
            xml::escape(token)
        );
        self.ptz_call(body).await.map(|_| ())
    }
}

fn vector_xml(v: &PtzVector) -> String {
    axes_xml(v.pan, v.tilt, v.zoom)
}

fn speed_xml(s: &PtzSpeed) -> String {
    axes_xml(s.pan, s.tilt, s.zoom)
}

fn axes_xml(pan: f32, tilt: f32, zoom: f32) -> String {
    format!(r#"<tt:PanTilt x="{}" y="{}"/><tt:Zoom x="{}"/>"#, pan, tilt, zoom)
}

fn malformed(what: &str) -> DeviceError {
    DeviceError::MalformedResponse(what.to_string())
}

fn number<T: std::str::FromStr>(text: Option<String>, what: &str) -> Result<T, DeviceError> {
    text.as_deref()
        .map(str::trim)
        .and_then(|t| t.parse::<T>().ok())
        .ok_or_else(|| malformed(what))
}

/// Optional numeric fields default to zero, like the device's own "not set".
fn number_or_zero<T: std::str::FromStr + Default>(text: Option<String>) -> T {
    text.and_then(|t| t.trim().parse::<T>().ok()).unwrap_or_default()
}

pub fn parse_capabilities(response: &str, device_url: &str) -> ServiceEndpoints {
    let capabilities = xml::find(response, "Capabilities");
    let xaddr = |service: &str| {
        capabilities
            .and_then(|c| c.find(service))
            .and_then(|s| s.child_text("XAddr"))
            .filter(|a| !a.is_empty())
    };
    ServiceEndpoints {
        media: xaddr("Media").unwrap_or_else(|| device_url.to_string()),
        ptz: xaddr("PTZ"),
    }
}

pub fn parse_profiles(response: &str) -> Result<Vec<StreamProfile>, DeviceError> {
    xml::find_all(response, "Profiles")
        .into_iter()
        .map(|node| parse_profile(&node))
        .collect()
}

fn parse_profile(node: &Element<'_>) -> Result<StreamProfile, DeviceError> {
    let token = node.attr("token").ok_or_else(|| malformed("profile without token"))?;
    let name = node.child_text("Name").unwrap_or_else(|| token.clone());

    let video = match node.child("VideoEncoderConfiguration") {
        Some(enc) => VideoEncoding {
            encoding: enc.child_text("Encoding").unwrap_or_default(),
            resolution: Resolution {
                width: number_or_zero(enc.path_text("Resolution/Width")),
                height: number_or_zero(enc.path_text("Resolution/Height")),
            },
            quality: number_or_zero(enc.child_text("Quality")),
            rate_control: RateControl {
                frame_rate_limit: number_or_zero(enc.path_text("RateControl/FrameRateLimit")),
                encoding_interval: number_or_zero(enc.path_text("RateControl/EncodingInterval")),
                bitrate_limit: number_or_zero(enc.path_text("RateControl/BitrateLimit")),
            },
        },
        None => VideoEncoding::default(),
    };

    let audio = node.child("AudioEncoderConfiguration").map(|enc| AudioEncoding {
        encoding: enc.child_text("Encoding").unwrap_or_default(),
        bitrate: number_or_zero(enc.child_text("Bitrate")),
        sample_rate: number_or_zero(enc.child_text("SampleRate")),
    });

    Ok(StreamProfile {
        token,
        name,
        video,
        audio,
    })
}

pub fn parse_stream_uri(response: &str) -> Result<String, DeviceError> {
    xml::find(response, "MediaUri")
        .and_then(|m| m.child_text("Uri"))
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| malformed("GetStreamUri response without Uri"))
}

fn range(node: &Element<'_>, axis: &str) -> Result<PtzRange, DeviceError> {
    let axis_node = node
        .path(&format!("Range/{}", axis))
        .ok_or_else(|| malformed("PTZ limits without range"))?;
    Ok(PtzRange {
        min: number(axis_node.child_text("Min"), "PTZ range min")?,
        max: number(axis_node.child_text("Max"), "PTZ range max")?,
    })
}

pub fn parse_ptz_limits(response: &str) -> Result<PtzLimits, DeviceError> {
    let config = xml::find(response, "PTZConfiguration")
        .ok_or_else(|| malformed("GetConfigurations response without PTZConfiguration"))?;

    let mut limits = PtzLimits::default();
    if let Some(pan_tilt) = config.child("PanTiltLimits") {
        limits.pan = range(&pan_tilt, "XRange")?;
        limits.tilt = range(&pan_tilt, "YRange")?;
    }
    if let Some(zoom) = config.child("ZoomLimits") {
        limits.zoom = range(&zoom, "XRange")?;
    }
    Ok(limits)
}

fn position(node: Option<Element<'_>>) -> Result<PtzVector, DeviceError> {
    let node = node.ok_or_else(|| malformed("missing PTZ position"))?;
    let pan_tilt = node.child("PanTilt");
    let zoom = node.child("Zoom");
    Ok(PtzVector {
        pan: number(pan_tilt.and_then(|p| p.attr("x")), "pan position")?,
        tilt: number(pan_tilt.and_then(|p| p.attr("y")), "tilt position")?,
        zoom: number(zoom.and_then(|z| z.attr("x")), "zoom position")?,
    })
}

pub fn parse_status(response: &str) -> Result<PtzStatus, DeviceError> {
    let status = xml::find(response, "PTZStatus")
        .ok_or_else(|| malformed("GetStatus response without PTZStatus"))?;
    let PtzVector { pan, tilt, zoom } = position(status.child("Position"))?;
    let move_status = status.child("MoveStatus");
    Ok(PtzStatus {
        pan,
        tilt,
        zoom,
        pan_tilt_state: move_status
            .and_then(|m| m.child_text("PanTilt"))
            .unwrap_or_default(),
        zoom_state: move_status
            .and_then(|m| m.child_text("Zoom"))
            .unwrap_or_default(),
    })
}

pub fn parse_presets(response: &str) -> Result<Vec<PtzPreset>, DeviceError> {
    xml::find_all(response, "Preset")
        .into_iter()
        .map(|node| {
            Ok(PtzPreset {
                id: node.attr("token").ok_or_else(|| malformed("preset without token"))?,
                name: node.child_text("Name").unwrap_or_default(),
                position: match node.child("PTZPosition") {
                    Some(p) => position(Some(p))?,
                    None => PtzVector::default(),
                },
            })
        })
        .collect()
}
