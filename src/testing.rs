//! Scripted stand-ins for the camera: device control, media transport and frame decoder.

use crate::device_control::{
    Credentials, DeviceAddress, DeviceConfiguration, DeviceConnector, DeviceHandle, PtzPreset,
    PtzSpeed, PtzStatus, PtzVector, StreamProfile, VideoEncoding,
};
use crate::error_handling::types::{DecodeError, DeviceError, IngestError};
use crate::media_ingest::nal;
use crate::media_ingest::{
    AccessUnit, CodecFamily, CodecParameters, DecoderFactory, FrameDecoder, MediaBackend,
    MediaConnection, MediaTransport,
};
use async_trait::async_trait;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UNIT_INTERVAL: Duration = Duration::from_millis(5);
const GARBAGE_HEADER: u8 = 0xff;
const PANIC_HEADER: u8 = 0xfe;
const SLOW_HEADER: u8 = 0xfd;
const SLOW_DECODE: Duration = Duration::from_millis(400);

fn sized_unit(header: u8, width: u32, height: u32) -> AccessUnit {
    let mut data = vec![0, 0, 0, 1, header];
    data.extend_from_slice(&(width as u16).to_be_bytes());
    data.extend_from_slice(&(height as u16).to_be_bytes());
    AccessUnit::new(CodecFamily::H264, data)
}

/// H.264 IDR unit the mock decoder turns into a `width` x `height` image.
pub fn key_unit(width: u32, height: u32) -> AccessUnit {
    sized_unit(0x65, width, height)
}

/// Non-IDR H.264 slice carrying the same size encoding as [`key_unit`].
pub fn plain_unit(width: u32, height: u32) -> AccessUnit {
    sized_unit(0x41, width, height)
}

/// What a scripted stream offers and delivers.
#[derive(Clone)]
pub struct StreamScript {
    codecs: Vec<CodecParameters>,
    units: Vec<AccessUnit>,
    repeat: Option<AccessUnit>,
    stall: bool,
}

impl StreamScript {
    /// `prelude`, then `key`, then `repeat` forever.
    pub fn endless(prelude: Vec<AccessUnit>, key: AccessUnit, repeat: AccessUnit) -> Self {
        let mut units = prelude;
        units.push(key);
        Self {
            codecs: vec![CodecParameters::new(CodecFamily::H264, 0)],
            units,
            repeat: Some(repeat),
            stall: false,
        }
    }

    /// Offers H.264 but never delivers a unit.
    pub fn stalled() -> Self {
        Self {
            codecs: vec![CodecParameters::new(CodecFamily::H264, 0)],
            units: Vec::new(),
            repeat: None,
            stall: true,
        }
    }

    /// Offers no supported codec.
    pub fn without_codecs() -> Self {
        Self {
            codecs: Vec::new(),
            units: Vec::new(),
            repeat: None,
            stall: false,
        }
    }

    /// Delivers `units`, then ends.
    pub fn finite(units: Vec<AccessUnit>) -> Self {
        Self {
            codecs: vec![CodecParameters::new(CodecFamily::H264, 0)],
            units,
            repeat: None,
            stall: false,
        }
    }
}

/// Media transport serving [`StreamScript`]s keyed by exact URI.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, StreamScript>>,
    connected: Mutex<Vec<String>>,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, uri: &str, script: StreamScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(uri.to_string(), script);
    }

    /// Connections currently held by ingest runs.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections seen so far.
    pub fn peak_connections(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Every URI a connection was opened to, in order.
    pub fn connected_uris(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTransport for ScriptedTransport {
    async fn connect(&self, uri: &str) -> Result<Box<dyn MediaConnection>, IngestError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| IngestError::TransportFailure(format!("no route to {}", uri)))?;
        self.connected.lock().unwrap().push(uri.to_string());
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script,
            position: 0,
            open: self.open.clone(),
        }))
    }
}

struct ScriptedConnection {
    script: StreamScript,
    position: usize,
    open: Arc<AtomicUsize>,
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaConnection for ScriptedConnection {
    fn offered_codecs(&self) -> Vec<CodecParameters> {
        self.script.codecs.clone()
    }

    async fn start(&mut self, _codec: &CodecParameters) -> Result<(), IngestError> {
        Ok(())
    }

    async fn next_access_unit(&mut self) -> Result<Option<AccessUnit>, IngestError> {
        if self.script.stall {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(UNIT_INTERVAL).await;
        let unit = match self.script.units.get(self.position) {
            Some(unit) => Some(unit.clone()),
            None => self.script.repeat.clone(),
        };
        self.position += 1;
        Ok(unit)
    }
}

/// Decoder factory whose decoders read the picture size back out of the unit.
#[derive(Default)]
pub struct MockDecoderFactory {
    sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl MockDecoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of every image decoded so far, by any decoder of this factory.
    pub fn decoded_sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().unwrap().clone()
    }

    /// A unit the mock decoder rejects as invalid.
    pub fn garbage_unit() -> AccessUnit {
        AccessUnit::new(CodecFamily::H264, vec![0, 0, 0, 1, GARBAGE_HEADER])
    }

    /// A unit that makes the mock decoder panic.
    pub fn panic_unit() -> AccessUnit {
        AccessUnit::new(CodecFamily::H264, vec![0, 0, 0, 1, PANIC_HEADER])
    }

    /// A unit the mock decoder takes a long time over, yielding nothing.
    pub fn slow_unit() -> AccessUnit {
        AccessUnit::new(CodecFamily::H264, vec![0, 0, 0, 1, SLOW_HEADER])
    }
}

impl DecoderFactory for MockDecoderFactory {
    fn create(&self, _codec: &CodecParameters) -> Result<Box<dyn FrameDecoder>, IngestError> {
        Ok(Box::new(MockDecoder {
            sizes: self.sizes.clone(),
        }))
    }
}

struct MockDecoder {
    sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl FrameDecoder for MockDecoder {
    fn decode(&mut self, unit: &AccessUnit) -> Result<Option<RgbImage>, DecodeError> {
        let nal = nal::split_annex_b(&unit.data)
            .into_iter()
            .find(|nal| !nal.is_empty())
            .ok_or_else(|| DecodeError::InvalidData(String::from("no NAL unit")))?;
        match nal[0] {
            GARBAGE_HEADER => return Err(DecodeError::InvalidData(String::from("garbage"))),
            PANIC_HEADER => panic!("decoder blew up"),
            SLOW_HEADER => {
                std::thread::sleep(SLOW_DECODE);
                return Ok(None);
            }
            _ => {}
        }
        if nal.len() < 5 {
            return Ok(None);
        }
        let width = u16::from_be_bytes([nal[1], nal[2]]) as u32;
        let height = u16::from_be_bytes([nal[3], nal[4]]) as u32;
        self.sizes.lock().unwrap().push((width, height));
        Ok(Some(RgbImage::new(width, height)))
    }
}

/// Stream address the mock device resolves for `profile`.
pub fn stream_uri(profile: &str) -> String {
    format!("rtsp://cam.local/{}", profile)
}

/// Profile listed by the mock device whose stream address cannot be resolved.
pub const BROKEN_PROFILE: &str = "broken";
/// Host the mock connector refuses.
pub const UNREACHABLE_HOST: &str = "192.0.2.1";

pub fn test_credentials() -> Credentials {
    Credentials::new("", "")
}

fn profile(name: &str, width: u32, height: u32) -> StreamProfile {
    let mut video = VideoEncoding {
        encoding: String::from("H264"),
        ..VideoEncoding::default()
    };
    video.resolution.width = width;
    video.resolution.height = height;
    StreamProfile {
        token: format!("{}_token", name),
        name: name.to_string(),
        video,
        audio: None,
    }
}

/// Camera with profiles `main`, `sub` and [`BROKEN_PROFILE`], recording every command.
pub struct MockDevice {
    configuration: DeviceConfiguration,
    commands: Mutex<Vec<String>>,
    status: Mutex<PtzStatus>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            configuration: DeviceConfiguration {
                profiles: vec![
                    profile("main", 64, 48),
                    profile("sub", 32, 24),
                    profile(BROKEN_PROFILE, 16, 16),
                ],
                ..DeviceConfiguration::default()
            },
            commands: Mutex::new(Vec::new()),
            status: Mutex::new(PtzStatus {
                pan_tilt_state: String::from("IDLE"),
                zoom_state: String::from("IDLE"),
                ..PtzStatus::default()
            }),
        }
    }

    /// Commands received so far, as `"<command> <profile>"`.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: &str, profile: &str) -> Result<(), DeviceError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{} {}", command, profile));
        if self.configuration.profile(profile).is_none() {
            return Err(DeviceError::UnknownProfile(profile.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for MockDevice {
    fn configuration(&self) -> &DeviceConfiguration {
        &self.configuration
    }

    async fn resolve_stream_address(&self, profile: &str) -> Result<String, DeviceError> {
        self.record("resolve", profile)?;
        if profile == BROKEN_PROFILE {
            return Err(DeviceError::Fault(String::from("stream unavailable")));
        }
        Ok(stream_uri(profile))
    }

    async fn get_status(&self, profile: &str) -> Result<PtzStatus, DeviceError> {
        self.record("status", profile)?;
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_presets(&self, profile: &str) -> Result<Vec<PtzPreset>, DeviceError> {
        self.record("presets", profile)?;
        Ok(vec![PtzPreset {
            id: String::from("1"),
            name: String::from("Door"),
            position: PtzVector::new(0.5, -0.25, 0.0),
        }])
    }

    async fn goto_preset(&self, profile: &str, preset: &str) -> Result<(), DeviceError> {
        self.record("goto_preset", profile)?;
        if preset != "1" {
            return Err(DeviceError::Fault(format!("no preset {}", preset)));
        }
        Ok(())
    }

    async fn absolute_move(
        &self,
        profile: &str,
        position: PtzVector,
        _speed: PtzSpeed,
    ) -> Result<(), DeviceError> {
        self.record("absolute_move", profile)?;
        let mut status = self.status.lock().unwrap();
        status.pan = position.pan;
        status.tilt = position.tilt;
        status.zoom = position.zoom;
        Ok(())
    }

    async fn relative_move(
        &self,
        profile: &str,
        translation: PtzVector,
        _speed: PtzSpeed,
    ) -> Result<(), DeviceError> {
        self.record("relative_move", profile)?;
        let mut status = self.status.lock().unwrap();
        status.pan += translation.pan;
        status.tilt += translation.tilt;
        status.zoom += translation.zoom;
        Ok(())
    }

    async fn stop(&self, profile: &str) -> Result<(), DeviceError> {
        self.record("stop", profile)
    }
}

/// Connector handing out a fresh [`MockDevice`] per connection.
#[derive(Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    delay: Option<Duration>,
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every connection setup take `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The device handed out by the most recent successful connection.
    pub fn last_device(&self) -> Option<Arc<MockDevice>> {
        self.devices.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(
        &self,
        address: &DeviceAddress,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>, DeviceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if address.host == UNREACHABLE_HOST {
            return Err(DeviceError::ConnectionFailed(format!("{} timed out", address)));
        }
        let device = Arc::new(MockDevice::new());
        self.devices.lock().unwrap().push(device.clone());
        Ok(device)
    }
}

/// Transport scripted with endless streams for `main` (64x48) and `sub` (32x24).
pub fn scripted_camera() -> Arc<ScriptedTransport> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        &stream_uri("main"),
        StreamScript::endless(vec![plain_unit(1, 1)], key_unit(64, 48), plain_unit(64, 48)),
    );
    transport.script(
        &stream_uri("sub"),
        StreamScript::endless(vec![plain_unit(1, 1)], key_unit(32, 24), plain_unit(32, 24)),
    );
    transport
}

pub fn backend(transport: Arc<ScriptedTransport>) -> MediaBackend {
    MediaBackend::new(transport, Arc::new(MockDecoderFactory::new()))
}
