use crate::error_handling::types::SessionError;
use crate::media_ingest::DecodedFrame;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;

/// A snapshot ready for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    /// Ingest run that decoded the source frame.
    pub generation: u64,
}

impl EncodedImage {
    pub fn encode(frame: &DecodedFrame, quality: u8) -> Result<Self, SessionError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode_image(&frame.image)
            .map_err(|e| SessionError::EncodingFailed(e.to_string()))?;
        Ok(Self {
            width: frame.width(),
            height: frame.height(),
            jpeg,
            generation: frame.generation,
        })
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }
}
