use std::io::Write;

use crate::error::Result;
use crate::segment::TranscriptionSegment;
use crate::segment_encoder::SegmentEncoder;

/// A `SegmentEncoder` that writes each segment's text as its own line, with no timing
/// information. Empty segments (left behind by overlap dedup) are skipped.
pub struct TextEncoder<W: Write> {
    w: W,
    closed: bool,
}

impl<W: Write> TextEncoder<W> {
    pub fn new(w: W) -> Self {
        Self { w, closed: false }
    }
}

impl<W: Write> SegmentEncoder for TextEncoder<W> {
    fn write_segment(&mut self, seg: &TranscriptionSegment) -> Result<()> {
        if self.closed {
            return Err(crate::error::Error::runtime(
                "cannot write segment: encoder is already closed",
            ));
        }

        if seg.text.trim().is_empty() {
            return Ok(());
        }

        writeln!(&mut self.w, "{}", seg.text.trim())?;
        self.w.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}
