use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use image_webp::{LoopCount, WebPDecoder};

use super::{blit_rgba, check_index, FrameSource};
use crate::buffer::FrameBuffer;
use crate::error::SourceError;

/// Animated (or still) WebP, decoded to RGBA canvases at load time.
pub struct WebpSource {
    width: u32,
    height: u32,
    canvases: Vec<Vec<u8>>,
    delays_ms: Vec<i64>,
    loop_count: u32,
    opaque: bool,
}

impl WebpSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let source = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "Loaded WebP {}: {}x{}, {} frames",
            path.display(),
            source.width,
            source.height,
            source.canvases.len()
        );
        Ok(source)
    }

    pub fn from_reader<R: BufRead + Seek>(reader: R) -> Result<Self, SourceError> {
        let mut decoder = WebPDecoder::new(reader)?;
        let (width, height) = decoder.dimensions();
        let has_alpha = decoder.has_alpha();
        let buf_len = decoder
            .output_buffer_size()
            .ok_or_else(|| SourceError::Other("WebP image too large".to_string()))?;

        let mut canvases = Vec::new();
        let mut delays_ms = Vec::new();
        let mut buf = vec![0u8; buf_len];

        let loop_count = if decoder.is_animated() {
            for _ in 0..decoder.num_frames() {
                let delay = decoder.read_frame(&mut buf)?;
                delays_ms.push(i64::from(delay));
                canvases.push(to_rgba(&buf, has_alpha));
            }
            match decoder.loop_count() {
                LoopCount::Forever => 0,
                LoopCount::Times(n) => u32::from(n.get()),
            }
        } else {
            decoder.read_image(&mut buf)?;
            delays_ms.push(0);
            canvases.push(to_rgba(&buf, has_alpha));
            1
        };

        if canvases.is_empty() {
            return Err(SourceError::Other("WebP has no frames".to_string()));
        }

        Ok(Self {
            width,
            height,
            canvases,
            delays_ms,
            loop_count,
            opaque: !has_alpha,
        })
    }
}

/// The decoder emits RGB when the image has no alpha channel.
fn to_rgba(buf: &[u8], has_alpha: bool) -> Vec<u8> {
    if has_alpha {
        return buf.to_vec();
    }
    let mut out = Vec::with_capacity(buf.len() / 3 * 4);
    for px in buf.chunks_exact(3) {
        out.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    out
}

impl FrameSource for WebpSource {
    fn frame_count(&self) -> usize {
        self.canvases.len()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_opaque(&self) -> bool {
        self.opaque
    }

    fn default_loop_count(&self) -> u32 {
        self.loop_count
    }

    fn decode_frame(
        &mut self,
        target: &mut FrameBuffer,
        frame_index: usize,
        _previous_frame_index: Option<usize>,
    ) -> Result<i64, SourceError> {
        check_index(frame_index, self.canvases.len())?;
        blit_rgba(&self.canvases[frame_index], self.width, self.height, target)?;
        Ok(self.delays_ms[frame_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rgb_is_widened_to_opaque_rgba() {
        let rgba = to_rgba(&[1, 2, 3, 4, 5, 6], false);
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn rgba_passes_through() {
        let rgba = to_rgba(&[1, 2, 3, 4], true);
        assert_eq!(rgba, vec![1, 2, 3, 4]);
    }

    #[test]
    fn garbage_input_fails_to_load() {
        assert!(WebpSource::from_reader(Cursor::new(b"RIFF0000WEBPjunk".to_vec())).is_err());
    }
}
