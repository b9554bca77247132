use serde::Deserialize;
use std::time::Duration;

/// HTTP front-end settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub cookie_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 8000,
            cookie_max_age_secs: 300,
        }
    }
}

/// Timing knobs of the session engine.
///
/// # Fields Overview
///
/// - `idle_timeout_secs`: inactivity window after which a session is torn down
/// - `idle_check_interval_ms`: period of the per-session idle watcher
/// - `sweep_interval_ms`: period of the registry sweeper
/// - `stop_poll_interval_ms`: granularity at which the ingest task checks for a stop request,
/// also used by profile switches waiting for the old run to finish
/// - `profile_switch_timeout_secs`: upper bound on that wait, `0` waits forever
/// - `jpeg_quality`: quality used when encoding snapshots
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub stop_poll_interval_ms: u64,
    pub profile_switch_timeout_secs: u64,
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            idle_check_interval_ms: 1000,
            sweep_interval_ms: 1000,
            stop_poll_interval_ms: 50,
            profile_switch_timeout_secs: 10,
            jpeg_quality: 80,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn profile_switch_timeout(&self) -> Option<Duration> {
        match self.profile_switch_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub request_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// External decoder process settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg_path: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: String::from("ffmpeg"),
        }
    }
}
