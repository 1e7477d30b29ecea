//! Asynchronous playback of animated images.
//!
//! A [`PlaybackController`] decodes frames of a [`FrameSource`] on a
//! [`DecodeWorker`] thread into a back buffer while the render thread keeps
//! showing the front buffer, swapping the two when each frame's deadline passes.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod playback;
pub mod scheduler;
pub mod sequence;
pub mod source;
pub mod worker;

pub use buffer::{FrameBuffer, FrameBufferPool, HeapPool, PixelFormat};
pub use config::PlaybackConfig;
pub use controller::PlaybackController;
pub use error::{Error, Result, SourceError};
pub use playback::{LoopCounter, LoopPolicy, PlaybackState};
pub use scheduler::{compute_deadline, SwapScheduler};
pub use sequence::Sequence;
pub use source::FrameSource;
pub use worker::{DecodeReport, DecodeRequest, DecodeWorker, DelayFloor};
