//! Session lifecycle core.
//!
//! This module provides the session type, the registry that owns every live session, the
//! idle watcher that expires inactive ones, and snapshot encoding.

/// Per-session idle expiry task.
pub mod idle_watcher;
/// Session state, profile switching and device pass-throughs.
pub mod session;
/// The process-wide session table and its sweeper.
pub mod session_registry;
/// JPEG encoding of decoded frames.
pub mod snapshot;


pub use session::{Session, SessionInfo, SessionSettings};
pub use session_registry::SessionRegistry;
pub use snapshot::EncodedImage;
