//! Local video preview
//!
//! - [`sink`]: Single-active decoder sink bound to a rendering surface

pub mod sink;

pub use sink::{AttachOutcome, VideoSinkCoordinator, VideoSinkHandle};
