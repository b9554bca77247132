//! Media ingest: stream transport, codec handling and the background ingest task.
//!
//! An ingest run connects to a camera stream, negotiates a codec, waits for the first key
//! frame and then keeps the owning session's [`FrameSlot`] filled with the latest decoded
//! picture until it is asked to stop.

/// Frame decoder trait and the FFmpeg-backed decoder.
pub mod decoder;
/// Latest-frame buffer shared with snapshot readers.
pub mod frame_slot;
/// The ingest state machine and its stop handshake.
pub mod ingest_task;
/// Annex-B and decoder configuration record helpers.
pub mod nal;
#[cfg(feature = "rtsp")]
pub mod rtsp_transport;
/// Media transport traits.
pub mod transport;
pub mod types;

pub use decoder::{DecoderFactory, FfmpegDecoderFactory, FrameDecoder};
pub use frame_slot::FrameSlot;
pub use ingest_task::{IngestControl, IngestOutcome, IngestRun, MediaBackend};
pub use transport::{default_transport, MediaConnection, MediaTransport, UnavailableTransport};
pub use types::*;
