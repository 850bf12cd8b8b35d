use std::io::Write;

use crate::error::Result;
use crate::segment::TranscriptionSegment;
use crate::segment_encoder::SegmentEncoder;
use crate::vtt_encoder::format_timestamp;

/// A `SegmentEncoder` that writes segments as numbered SubRip (`.srt`) cues.
pub struct SrtEncoder<W: Write> {
    w: W,
    index: u32,
    closed: bool,
}

impl<W: Write> SrtEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            index: 0,
            closed: false,
        }
    }
}

impl<W: Write> SegmentEncoder for SrtEncoder<W> {
    fn write_segment(&mut self, seg: &TranscriptionSegment) -> Result<()> {
        if self.closed {
            return Err(crate::error::Error::runtime(
                "cannot write segment: encoder is already closed",
            ));
        }

        self.index += 1;
        let start = format_timestamp(seg.start_seconds, ',');
        let end = format_timestamp(seg.end_seconds, ',');

        writeln!(&mut self.w, "{}", self.index)?;
        writeln!(&mut self.w, "{start} --> {end}")?;
        writeln!(&mut self.w, "{}", seg.text)?;
        writeln!(&mut self.w)?;

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
