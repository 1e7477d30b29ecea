pub mod gif;
pub mod webp;

use std::path::Path;

use crate::buffer::FrameBuffer;
use crate::error::SourceError;

pub use self::gif::GifSource;
pub use self::webp::WebpSource;

/// Produces the pixels of one frame at a time.
///
/// `decode_frame` is blocking and is only ever called from the decode thread.
pub trait FrameSource: Send {
    fn frame_count(&self) -> usize;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn is_opaque(&self) -> bool;
    /// Authored loop count; 0 loops forever.
    fn default_loop_count(&self) -> u32;

    /// Write frame `frame_index` into `target` and return its authored delay in ms.
    ///
    /// `previous_frame_index` is the frame whose pixels `target` already holds, so
    /// an incremental decoder can draw on top of it. `None` means the contents are
    /// blank or unknown and the frame must be drawn in full.
    fn decode_frame(
        &mut self,
        target: &mut FrameBuffer,
        frame_index: usize,
        previous_frame_index: Option<usize>,
    ) -> Result<i64, SourceError>;
}

/// Open an animated image, choosing the decoder from the file extension.
pub fn open(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "gif" => Ok(Box::new(GifSource::open(path)?)),
        "webp" => Ok(Box::new(WebpSource::open(path)?)),
        _ => Err(SourceError::Other(format!(
            "unsupported animation format: {}",
            path.display()
        ))),
    }
}

/// Copy a tightly packed RGBA canvas into the top-left corner of `target`.
pub(crate) fn blit_rgba(
    canvas: &[u8],
    width: u32,
    height: u32,
    target: &mut FrameBuffer,
) -> Result<(), SourceError> {
    if target.width < width || target.height < height {
        return Err(SourceError::BufferTooSmall {
            width: target.width,
            height: target.height,
            need_width: width,
            need_height: height,
        });
    }
    let row_bytes = width as usize * 4;
    for y in 0..height {
        let src = &canvas[y as usize * row_bytes..(y as usize + 1) * row_bytes];
        target.row_mut(y)[..row_bytes].copy_from_slice(src);
    }
    Ok(())
}

pub(crate) fn check_index(index: usize, count: usize) -> Result<(), SourceError> {
    if index >= count {
        return Err(SourceError::FrameOutOfRange { index, count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    #[test]
    fn blit_respects_target_stride() {
        let canvas = [1u8; 2 * 2 * 4];
        let mut target = FrameBuffer::new(0, 3, 2, PixelFormat::Rgba8);
        blit_rgba(&canvas, 2, 2, &mut target).unwrap();
        assert_eq!(&target.row(0)[..8], &[1; 8]);
        assert_eq!(&target.row(0)[8..], &[0; 4]);
        assert_eq!(&target.row(1)[..8], &[1; 8]);
    }

    #[test]
    fn blit_rejects_small_target() {
        let canvas = [0u8; 4 * 4 * 4];
        let mut target = FrameBuffer::new(0, 2, 2, PixelFormat::Rgba8);
        assert!(matches!(
            blit_rgba(&canvas, 4, 4, &mut target),
            Err(SourceError::BufferTooSmall { need_width: 4, .. })
        ));
    }

    #[test]
    fn open_rejects_unknown_extensions() {
        assert!(matches!(
            open(Path::new("clip.mp4")),
            Err(SourceError::Other(_))
        ));
    }
}
