use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures reported by the camera control protocol client.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    ConnectionFailed(String),
    Http(u16),
    Fault(String),
    MalformedResponse(String),
    UnknownProfile(String),
    Unsupported(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::ConnectionFailed(e) => write!(f, "Device connection failed: {}", e),
            DeviceError::Http(status) => write!(f, "Device answered with HTTP status {}", status),
            DeviceError::Fault(reason) => write!(f, "Device fault: {}", reason),
            DeviceError::MalformedResponse(e) => write!(f, "Malformed device response: {}", e),
            DeviceError::UnknownProfile(name) => write!(f, "Unknown profile: {}", name),
            DeviceError::Unsupported(what) => write!(f, "Unsupported by device: {}", what),
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug)]
pub enum SessionError {
    DeviceUnreachable(DeviceError),
    ProfileResolutionFailed { profile: String, source: DeviceError },
    NoFrameAvailable,
    NotFound,
    Terminated,
    IngestStopTimeout(Duration),
    EncodingFailed(String),
    DeviceCommandFailed(DeviceError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DeviceUnreachable(e) => write!(f, "Device unreachable: {}", e),
            SessionError::ProfileResolutionFailed { profile, source } => {
                write!(f, "Profile '{}' could not be resolved: {}", profile, source)
            }
            SessionError::NoFrameAvailable => write!(f, "No frame received"),
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::Terminated => write!(f, "Session terminated"),
            SessionError::IngestStopTimeout(waited) => {
                write!(f, "Ingest task did not stop within {:?}", waited)
            }
            SessionError::EncodingFailed(e) => write!(f, "Snapshot encoding failed: {}", e),
            SessionError::DeviceCommandFailed(e) => write!(f, "Device command failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// Reasons a single ingest run ends before a stop was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    TransportFailure(String),
    CodecNegotiationFailed(String),
    DecoderFailure(String),
    StreamEnded,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::TransportFailure(e) => write!(f, "Transport failure: {}", e),
            IngestError::CodecNegotiationFailed(e) => write!(f, "Codec negotiation failed: {}", e),
            IngestError::DecoderFailure(e) => write!(f, "Decoder failure: {}", e),
            IngestError::StreamEnded => write!(f, "Stream ended"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Failure to decode one access unit.
///
/// `InvalidData` only costs the unit it came from; `DecoderGone` means the decoder can no longer
/// be fed and ends the ingest run.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    InvalidData(String),
    DecoderGone(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidData(e) => write!(f, "Invalid access unit: {}", e),
            DecodeError::DecoderGone(e) => write!(f, "Decoder unavailable: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frame_message_matches_wire_text() {
        assert_eq!(SessionError::NoFrameAvailable.to_string(), "No frame received");
    }

    #[test]
    fn profile_failure_names_profile_and_cause() {
        let err = SessionError::ProfileResolutionFailed {
            profile: "sub".to_string(),
            source: DeviceError::UnknownProfile("sub".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("'sub'"));
        assert!(text.contains("Unknown profile"));
    }
}
