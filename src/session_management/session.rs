use super::snapshot::EncodedImage;
use crate::configuration::SessionConfig;
use crate::device_control::{
    embed_credentials, Credentials, DeviceAddress, DeviceConfiguration, DeviceHandle,
    MovingStatus, PtzPreset, PtzSpeed, PtzStatus, PtzVector,
};
use crate::error_handling::types::{DeviceError, SessionError};
use crate::media_ingest::{FrameSlot, IngestControl, IngestRun, IngestState, MediaBackend};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing and encoding parameters of a session, derived from [`SessionConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub stop_poll_interval: Duration,
    pub profile_switch_timeout: Option<Duration>,
    pub jpeg_quality: u8,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            idle_check_interval: config.idle_check_interval(),
            stop_poll_interval: config.stop_poll_interval(),
            profile_switch_timeout: config.profile_switch_timeout(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Serialisable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub device: String,
    pub profile: String,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub ingest: IngestState,
    pub terminated: bool,
}

/// A client's device-control and live-video context.
///
/// # Fields Overview
///
/// - `id`: opaque identifier handed to the client
/// - `address` / `credentials`: the camera this session controls
/// - `device`: connected device handle, shared with nobody else
/// - `active_profile`: name of the profile feeding the frame slot
/// - `last_activity`: refreshed by [`Session::touch`], read by the idle watcher
/// - `frame_slot`: latest decoded frame
/// - `terminated`: set once, tells the registry to reap the session
/// - `ingest`: stop request / stop confirmation of the current ingest run
/// - `ingest_state`: progress of the current ingest run
/// - `profile_switch`: serialises every operation that replaces the ingest run
/// - `generation`: number of ingest runs started so far
pub struct Session {
    id: Uuid,
    address: DeviceAddress,
    credentials: Credentials,
    device: Arc<dyn DeviceHandle>,
    active_profile: RwLock<String>,
    last_activity: Mutex<Instant>,
    created_at: DateTime<Utc>,
    frame_slot: Arc<FrameSlot>,
    terminated: AtomicBool,
    ingest: Arc<IngestControl>,
    ingest_state: Arc<watch::Sender<IngestState>>,
    profile_switch: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    media: MediaBackend,
    settings: SessionSettings,
}

impl Session {
    pub(crate) fn new(
        address: DeviceAddress,
        credentials: Credentials,
        device: Arc<dyn DeviceHandle>,
        profile: String,
        media: MediaBackend,
        settings: SessionSettings,
    ) -> Self {
        let (ingest_state, _) = watch::channel(IngestState::Stopped);
        Self {
            id: Uuid::new_v4(),
            address,
            credentials,
            device,
            active_profile: RwLock::new(profile),
            last_activity: Mutex::new(Instant::now()),
            created_at: Utc::now(),
            frame_slot: Arc::new(FrameSlot::new()),
            terminated: AtomicBool::new(false),
            ingest: Arc::new(IngestControl::new()),
            ingest_state: Arc::new(ingest_state),
            profile_switch: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            media,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn active_profile(&self) -> String {
        self.active_profile
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn ingest_state(&self) -> IngestState {
        *self.ingest_state.borrow()
    }

    /// Watches the ingest state across runs.
    pub fn subscribe_ingest_state(&self) -> watch::Receiver<IngestState> {
        self.ingest_state.subscribe()
    }

    /// Number of ingest runs started so far; frames carry the run that decoded them.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn frame_slot(&self) -> &FrameSlot {
        &self.frame_slot
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        let last = *self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        Instant::now().saturating_duration_since(last)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.to_string(),
            device: self.address.to_string(),
            profile: self.active_profile(),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
            ingest: self.ingest_state(),
            terminated: self.is_terminated(),
        }
    }

    /// Stream address of `profile` with this session's credentials embedded.
    pub(crate) async fn stream_uri(&self, profile: &str) -> Result<String, DeviceError> {
        let uri = self.device.resolve_stream_address(profile).await?;
        embed_credentials(&uri, &self.credentials)
    }

    /// Starts the next ingest run. Callers must have observed the previous run stopped and
    /// reset the control flags.
    pub(crate) fn launch_ingest(&self, uri: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let run = IngestRun {
            tag: self.id.to_string(),
            generation,
            uri,
            backend: self.media.clone(),
            frame_slot: self.frame_slot.clone(),
            control: self.ingest.clone(),
            state: self.ingest_state.clone(),
            stop_poll: self.settings.stop_poll_interval,
        };
        run.spawn();
    }

    /// A teardown that raced the launch must also stop the run just started.
    fn stop_if_terminated(&self) {
        if self.is_terminated() {
            self.ingest.request_stop();
        }
    }

    /// Switches the stream feeding the frame slot to `profile`.
    ///
    /// The current run keeps going when the new profile cannot be resolved. Otherwise the
    /// call returns once the old run has stopped and the new one has been started.
    pub async fn change_profile(&self, profile: &str) -> Result<(), SessionError> {
        let _switch = self.profile_switch.lock().await;
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }
        if self.active_profile() == profile {
            debug!("[{}] Already on profile {}", self.id, profile);
            self.touch();
            return Ok(());
        }

        let uri = self
            .stream_uri(profile)
            .await
            .map_err(|source| SessionError::ProfileResolutionFailed {
                profile: profile.to_string(),
                source,
            })?;

        self.ingest.request_stop();
        let poll = self.settings.stop_poll_interval;
        match self.settings.profile_switch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.ingest.wait_stopped(poll))
                .await
                .map_err(|_| {
                    warn!("[{}] Ingest did not stop within {:?}", self.id, limit);
                    SessionError::IngestStopTimeout(limit)
                })?,
            None => self.ingest.wait_stopped(poll).await,
        }
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }

        self.ingest.reset();
        self.launch_ingest(uri);
        *self
            .active_profile
            .write()
            .unwrap_or_else(|e| e.into_inner()) = profile.to_string();
        self.stop_if_terminated();
        info!("[{}] Switched to profile {}", self.id, profile);
        self.touch();
        Ok(())
    }

    /// Starts a new ingest run on the active profile if the current one has ended.
    ///
    /// Returns `false` when a run is still alive and nothing was done.
    pub async fn restart_ingest(&self) -> Result<bool, SessionError> {
        let _switch = self.profile_switch.lock().await;
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }
        if !self.ingest.is_stopped() {
            self.touch();
            return Ok(false);
        }

        let profile = self.active_profile();
        let uri = self
            .stream_uri(&profile)
            .await
            .map_err(|source| SessionError::ProfileResolutionFailed {
                profile: profile.clone(),
                source,
            })?;
        self.ingest.reset();
        self.launch_ingest(uri);
        self.stop_if_terminated();
        info!("[{}] Ingest restarted on profile {}", self.id, profile);
        self.touch();
        Ok(true)
    }

    /// Encodes the latest decoded frame.
    ///
    /// Asking counts as activity even when no frame is available yet.
    pub async fn snapshot(&self) -> Result<EncodedImage, SessionError> {
        self.touch();
        let frame = self
            .frame_slot
            .latest()
            .ok_or(SessionError::NoFrameAvailable)?;
        let quality = self.settings.jpeg_quality;
        tokio::task::spawn_blocking(move || EncodedImage::encode(&frame, quality))
            .await
            .map_err(|e| SessionError::EncodingFailed(e.to_string()))?
    }

    /// Idle expiry: stop the ingest, then flag the session for reaping.
    pub(crate) fn expire(&self) {
        self.ingest.request_stop();
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Explicit teardown, same outcome as idle expiry.
    pub fn close(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            info!("[{}] Session closed", self.id);
        }
        self.ingest.request_stop();
    }

    /// Final cleanup once the registry has dropped the session.
    pub(crate) fn release(&self) {
        self.ingest.request_stop();
        self.frame_slot.clear();
    }

    fn completed<T>(&self, result: Result<T, DeviceError>) -> Result<T, SessionError> {
        let value = result.map_err(SessionError::DeviceCommandFailed)?;
        self.touch();
        Ok(value)
    }

    pub fn configuration(&self) -> DeviceConfiguration {
        self.touch();
        self.device.configuration().clone()
    }

    pub async fn status(&self) -> Result<PtzStatus, SessionError> {
        let result = self.device.get_status(&self.active_profile()).await;
        self.completed(result)
    }

    pub async fn moving(&self) -> Result<MovingStatus, SessionError> {
        Ok(self.status().await?.moving())
    }

    pub async fn presets(&self) -> Result<Vec<PtzPreset>, SessionError> {
        let result = self.device.get_presets(&self.active_profile()).await;
        self.completed(result)
    }

    pub async fn goto_preset(&self, preset: &str) -> Result<(), SessionError> {
        let result = self
            .device
            .goto_preset(&self.active_profile(), preset)
            .await;
        self.completed(result)
    }

    pub async fn absolute_move(&self, position: PtzVector, speed: PtzSpeed) -> Result<(), SessionError> {
        let result = self
            .device
            .absolute_move(&self.active_profile(), position, speed)
            .await;
        self.completed(result)
    }

    pub async fn goto_home(&self) -> Result<(), SessionError> {
        self.absolute_move(PtzVector::default(), PtzSpeed::default())
            .await
    }

    pub async fn relative_move(
        &self,
        translation: PtzVector,
        speed: PtzSpeed,
    ) -> Result<(), SessionError> {
        let result = self
            .device
            .relative_move(&self.active_profile(), translation, speed)
            .await;
        self.completed(result)
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        let result = self.device.stop(&self.active_profile()).await;
        self.completed(result)
    }
}
