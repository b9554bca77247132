//! Frame decoder interface and the FFmpeg-backed implementation.
//!
//! The FFmpeg decoder runs `ffmpeg` as a child process: Annex-B access units are written to its
//! stdin and decoded pictures come back on stdout as a stream of binary PPM images, read by a
//! dedicated thread.

use super::nal;
use super::types::{AccessUnit, CodecFamily, CodecParameters};
use crate::error_handling::types::{DecodeError, IngestError};
use image::codecs::pnm::PnmDecoder;
use image::error::{UnsupportedError, UnsupportedErrorKind};
use image::{ColorType, DynamicImage, ImageDecoder, ImageError, ImageFormat, Limits, RgbImage};
use log::{debug, trace, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

/// Stateful decoder of one elementary stream.
pub trait FrameDecoder: Send {
    /// Feeds one access unit. `Ok(None)` means more input is needed before a picture is ready.
    fn decode(&mut self, unit: &AccessUnit) -> Result<Option<RgbImage>, DecodeError>;
}

pub trait DecoderFactory: Send + Sync {
    fn create(&self, codec: &CodecParameters) -> Result<Box<dyn FrameDecoder>, IngestError>;
}

/// Spawns one `ffmpeg` process per ingest run.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderFactory {
    ffmpeg_path: String,
}

impl FfmpegDecoderFactory {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn input_format(family: CodecFamily) -> &'static str {
        match family {
            CodecFamily::H264 => "h264",
            CodecFamily::H265 => "hevc",
        }
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn create(&self, codec: &CodecParameters) -> Result<Box<dyn FrameDecoder>, IngestError> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-f",
                Self::input_format(codec.family),
                "-i",
                "pipe:0",
                "-f",
                "image2pipe",
                "-c:v",
                "ppm",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                IngestError::DecoderFailure(format!("cannot start {}: {}", self.ffmpeg_path, e))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(IngestError::DecoderFailure(String::from(
                    "decoder process pipes unavailable",
                )));
            }
        };

        let (frames_tx, frames_rx) = mpsc::channel();
        thread::Builder::new()
            .name(String::from("ppm-reader"))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    match read_ppm(&mut reader) {
                        Ok(Some(image)) => {
                            if frames_tx.send(image).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Decoder output unreadable: {}", e);
                            break;
                        }
                    }
                }
                trace!("Decoder output closed");
            })
            .map_err(|e| IngestError::DecoderFailure(e.to_string()))?;

        let mut decoder = FfmpegDecoder {
            child,
            stdin,
            frames: frames_rx,
        };
        if !codec.parameter_sets.is_empty() {
            decoder
                .write(&nal::to_annex_b(&codec.parameter_sets))
                .map_err(|e| IngestError::DecoderFailure(e.to_string()))?;
        }
        debug!("Started {} decoder ({})", codec.family, self.ffmpeg_path);
        Ok(Box::new(decoder))
    }
}

pub struct FfmpegDecoder {
    child: Child,
    stdin: ChildStdin,
    frames: Receiver<RgbImage>,
}

impl FfmpegDecoder {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stdin.write_all(data)?;
        self.stdin.flush()
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn decode(&mut self, unit: &AccessUnit) -> Result<Option<RgbImage>, DecodeError> {
        if unit.data.is_empty() {
            return Err(DecodeError::InvalidData(String::from("empty access unit")));
        }
        self.write(&unit.data)
            .map_err(|e| DecodeError::DecoderGone(e.to_string()))?;

        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(image) => latest = Some(image),
                Err(TryRecvError::Empty) => return Ok(latest),
                Err(TryRecvError::Disconnected) => {
                    return match latest {
                        Some(image) => Ok(Some(image)),
                        None => Err(DecodeError::DecoderGone(String::from(
                            "decoder process exited",
                        ))),
                    };
                }
            }
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Reads one binary 8-bit RGB (P6) PPM picture. `Ok(None)` on a clean end of stream.
pub fn read_ppm<R: BufRead>(reader: &mut R) -> Result<Option<RgbImage>, ImageError> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let decoder = PnmDecoder::new(&mut *reader)?;
    if decoder.color_type() != ColorType::Rgb8 {
        return Err(ImageError::Unsupported(UnsupportedError::from_format_and_kind(
            ImageFormat::Pnm.into(),
            UnsupportedErrorKind::Color(decoder.original_color_type()),
        )));
    }
    Limits::default().reserve(decoder.total_bytes())?;
    Ok(Some(DynamicImage::from_decoder(decoder)?.into_rgb8()))
}
