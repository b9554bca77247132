use super::nal;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::fmt;

/// Compressed video families the ingest task can negotiate, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodecFamily {
    H264,
    H265,
}

impl CodecFamily {
    pub const PREFERENCE: [CodecFamily; 2] = [CodecFamily::H264, CodecFamily::H265];

    /// Maps an RTP/SDP encoding name (`H264`, `h265`, `HEVC`, ...) to a family.
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Some(CodecFamily::H264),
            "h265" | "hevc" => Some(CodecFamily::H265),
            _ => None,
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecFamily::H264 => write!(f, "H.264"),
            CodecFamily::H265 => write!(f, "H.265"),
        }
    }
}

/// A codec offered by a media connection, with what a decoder needs to start.
///
/// # Fields Overview
///
/// - `family`: compressed format of the track
/// - `track`: transport-specific index of the track carrying it
/// - `parameter_sets`: VPS/SPS/PPS NAL units, without start codes
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub family: CodecFamily,
    pub track: usize,
    pub parameter_sets: Vec<Vec<u8>>,
}

impl CodecParameters {
    pub fn new(family: CodecFamily, track: usize) -> Self {
        Self {
            family,
            track,
            parameter_sets: Vec::new(),
        }
    }
}

/// One compressed picture in Annex-B form (start-code delimited NAL units).
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    pub family: CodecFamily,
    pub data: Vec<u8>,
}

impl AccessUnit {
    pub fn new(family: CodecFamily, data: Vec<u8>) -> Self {
        Self { family, data }
    }

    /// Whether decoding can start from this unit.
    pub fn contains_key_frame(&self) -> bool {
        nal::contains_key_frame(self.family, &self.data)
    }
}

/// A fully decoded picture, as stored in a session's frame slot.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: RgbImage,
    /// Ingest run that produced the frame.
    pub generation: u64,
    pub decoded_at: DateTime<Utc>,
}

impl DecodedFrame {
    pub fn new(image: RgbImage, generation: u64) -> Self {
        Self {
            image,
            generation,
            decoded_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Progress of one ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestState {
    Connecting,
    Negotiating,
    AwaitingKeyFrame,
    Streaming,
    Stopped,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestState::Connecting => "connecting",
            IngestState::Negotiating => "negotiating",
            IngestState::AwaitingKeyFrame => "awaiting key frame",
            IngestState::Streaming => "streaming",
            IngestState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}
