use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{blit_rgba, check_index, FrameSource};
use crate::buffer::FrameBuffer;
use crate::error::SourceError;

/// Animated GIF with every frame composited up front.
///
/// GIF frames are partial updates, so each stored canvas is the full image as it
/// looks once that frame has been drawn. Decoding a frame is then a straight copy,
/// which makes random access (restarts, previous-frame mismatches) free.
pub struct GifSource {
    width: u32,
    height: u32,
    canvases: Vec<Vec<u8>>,
    delays_ms: Vec<i64>,
    loop_count: u32,
    opaque: bool,
}

impl GifSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let source = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "Loaded GIF {}: {}x{}, {} frames",
            path.display(),
            source.width,
            source.height,
            source.canvases.len()
        );
        Ok(source)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SourceError> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(reader)?;

        let width = u32::from(decoder.width());
        let height = u32::from(decoder.height());
        let (w, h) = (width as usize, height as usize);

        let mut canvases = Vec::new();
        let mut delays_ms = Vec::new();
        let mut opaque = true;
        let mut canvas = vec![0u8; w * h * 4];

        while let Some(frame) = decoder.read_next_frame()? {
            // GIF delay is in centiseconds
            delays_ms.push(i64::from(frame.delay) * 10);

            let fx = usize::from(frame.left);
            let fy = usize::from(frame.top);
            let fw = usize::from(frame.width);
            let fh = usize::from(frame.height);

            if frame.transparent.is_some() {
                opaque = false;
            }
            if canvases.is_empty() && (fx > 0 || fy > 0 || fw < w || fh < h) {
                opaque = false;
            }

            let restore = matches!(frame.dispose, gif::DisposalMethod::Previous)
                .then(|| canvas.clone());

            // Frames may hang off (or lie wholly outside) the logical screen
            let x_end = (fx + fw).min(w);
            let y_end = (fy + fh).min(h);

            for dst_y in fy.min(h)..y_end {
                for dst_x in fx.min(w)..x_end {
                    let src_idx = ((dst_y - fy) * fw + (dst_x - fx)) * 4;
                    let Some(src) = frame.buffer.get(src_idx..src_idx + 4) else {
                        continue;
                    };
                    // Transparent pixels leave the previous canvas showing
                    if src[3] > 0 {
                        let dst_idx = (dst_y * w + dst_x) * 4;
                        canvas[dst_idx..dst_idx + 4].copy_from_slice(src);
                    }
                }
            }

            canvases.push(canvas.clone());

            match frame.dispose {
                gif::DisposalMethod::Background => {
                    let x_start = fx.min(w);
                    for y in fy.min(h)..y_end {
                        canvas[(y * w + x_start) * 4..(y * w + x_end) * 4].fill(0);
                    }
                }
                gif::DisposalMethod::Previous => {
                    if let Some(saved) = restore {
                        canvas = saved;
                    }
                }
                _ => {}
            }
        }

        if canvases.is_empty() {
            return Err(SourceError::Other("GIF has no frames".to_string()));
        }

        let loop_count = match decoder.repeat() {
            gif::Repeat::Infinite => 0,
            // No NETSCAPE extension: play through once
            gif::Repeat::Finite(0) => 1,
            gif::Repeat::Finite(n) => u32::from(n),
        };

        Ok(Self {
            width,
            height,
            canvases,
            delays_ms,
            loop_count,
            opaque,
        })
    }

    /// Authored delays in milliseconds, before any minimum-delay substitution.
    pub fn delays_ms(&self) -> &[i64] {
        &self.delays_ms
    }
}

impl FrameSource for GifSource {
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
