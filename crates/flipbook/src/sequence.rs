use crate::error::{Error, Result};
use crate::source::FrameSource;

/// Immutable description of an animation, captured once from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub opaque: bool,
    /// Authored loop count. 0 means loop forever.
    pub default_loop_count: u32,
}

impl Sequence {
    /// Snapshot the metadata of `source`, rejecting empty or zero-sized animations.
    pub fn from_source(source: &dyn FrameSource) -> Result<Self> {
        let seq = Self {
            frame_count: source.frame_count(),
            width: source.width(),
            height: source.height(),
            opaque: source.is_opaque(),
            default_loop_count: source.default_loop_count(),
        };
        if seq.frame_count == 0 {
            return Err(Error::InvalidSequence("sequence has no frames".into()));
        }
        if seq.width == 0 || seq.height == 0 {
            return Err(Error::InvalidSequence(format!(
                "sequence has zero-sized frames ({}x{})",
                seq.width, seq.height
            )));
        }
        Ok(seq)
    }

    /// Index of the frame after `index`, wrapping at the end.
    pub fn successor(&self, index: usize) -> usize {
        (index + 1) % self.frame_count
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBuffer;
    use crate::error::SourceError;

    struct Meta {
        frames: usize,
        width: u32,
    }

    impl FrameSource for Meta {
        fn frame_count(&self) -> usize {
            self.frames
        }
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            2
        }
        fn is_opaque(&self) -> bool {
            true
        }
        fn default_loop_count(&self) -> u32 {
            3
        }
        fn decode_frame(
            &mut self,
            _target: &mut FrameBuffer,
            _frame_index: usize,
            _previous_frame_index: Option<usize>,
        ) -> std::result::Result<i64, SourceError> {
            Ok(0)
        }
    }

    #[test]
    fn snapshot_copies_metadata() {
        let seq = Sequence::from_source(&Meta { frames: 4, width: 3 }).unwrap();
        assert_eq!(seq.frame_count, 4);
        assert_eq!((seq.width, seq.height), (3, 2));
        assert!(seq.opaque);
        assert_eq!(seq.default_loop_count, 3);
        assert!(seq.is_animated());
    }

    #[test]
    fn successor_wraps() {
        let seq = Sequence::from_source(&Meta { frames: 3, width: 1 }).unwrap();
        assert_eq!(seq.successor(0), 1);
        assert_eq!(seq.successor(2), 0);
    }

    #[test]
    fn empty_sequences_are_rejected() {
        assert!(matches!(
            Sequence::from_source(&Meta { frames: 0, width: 1 }),
            Err(Error::InvalidSequence(_))
        ));
        assert!(matches!(
            Sequence::from_source(&Meta { frames: 2, width: 0 }),
            Err(Error::InvalidSequence(_))
        ));
    }
}
