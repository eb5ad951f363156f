//! Outbound re-broadcast of the video feed
//!
//! - [`session`]: Connect/stop state machine around the stream publisher

pub mod session;

pub use session::{StateHook, StreamingSessionManager};
