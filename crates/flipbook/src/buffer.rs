use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Pixel layout of a [`FrameBuffer`]. Only `Rgba8` can be decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }
}

/// A pixel buffer handed out by a [`FrameBufferPool`].
///
/// Buffers are moved, never shared: whoever holds the value is the only
/// party that may touch its pixels.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Pool-assigned identity, stable for the buffer's lifetime.
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(id: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            id,
            width,
            height,
            format,
            data: vec![0u8; len],
        }
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    /// Fill the whole buffer with one RGBA color.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Check the buffer can hold a `min_width` x `min_height` RGBA frame.
    pub fn validate(&self, min_width: u32, min_height: u32) -> Result<()> {
        let len_ok = self.data.len() >= self.stride() * self.height as usize;
        if self.format != PixelFormat::Rgba8
            || self.width < min_width
            || self.height < min_height
            || !len_ok
        {
            return Err(Error::InvalidBuffer {
                width: self.width,
                height: self.height,
                format: self.format,
                min_width,
                min_height,
            });
        }
        Ok(())
    }
}

/// Supplies and reclaims pixel buffers.
///
/// `release` may be called from the render thread or the decode thread.
pub trait FrameBufferPool: Send + Sync {
    /// Return a buffer at least `min_width` x `min_height`.
    fn acquire(&self, min_width: u32, min_height: u32) -> FrameBuffer;

    fn release(&self, buffer: FrameBuffer);
}

/// Pool that allocates fresh RGBA buffers on the heap and drops them on release.
#[derive(Debug, Default)]
pub struct HeapPool {
    next_id: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl HeapPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

impl FrameBufferPool for HeapPool {
    fn acquire(&self, min_width: u32, min_height: u32) -> FrameBuffer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        FrameBuffer::new(id, min_width, min_height, PixelFormat::Rgba8)
    }

    fn release(&self, buffer: FrameBuffer) {
        self.released.fetch_add(1, Ordering::SeqCst);
        log::debug!("Released frame buffer #{}", buffer.id);
    }
}
