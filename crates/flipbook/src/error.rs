use thiserror::Error;

use crate::buffer::PixelFormat;

/// Errors surfaced by the playback engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool handed back a buffer the engine cannot decode into.
    #[error(
        "invalid buffer: got {width}x{height} {format:?}, need at least {min_width}x{min_height} Rgba8"
    )]
    InvalidBuffer {
        width: u32,
        height: u32,
        format: PixelFormat,
        min_width: u32,
        min_height: u32,
    },

    /// Operation attempted after `destroy()`.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Programming error: terminal toggle, double destroy, or wrong thread.
    #[error("illegal use: {0}")]
    IllegalUse(String),

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    /// The first frame could not be produced at construction.
    #[error("decode failed: {0}")]
    Decode(#[from] SourceError),

    #[error("decode worker is not running")]
    WorkerUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a [`FrameSource`](crate::source::FrameSource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("frame {index} out of range (sequence has {count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("target buffer {width}x{height} is smaller than the {need_width}x{need_height} frame")]
    BufferTooSmall {
        width: u32,
        height: u32,
        need_width: u32,
        need_height: u32,
    },

    #[error("GIF: {0}")]
    Gif(#[from] gif::DecodingError),

    #[error("WebP: {0}")]
    WebP(#[from] image_webp::DecodingError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for sources that fail without a structured cause.
    #[error("{0}")]
    Other(String),
}
