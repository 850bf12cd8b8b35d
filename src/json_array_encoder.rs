use std::io::Write;

use crate::error::Result;
use crate::segment::TranscriptionSegment;
use crate::segment_encoder::SegmentEncoder;

/// A `SegmentEncoder` that writes segments as a single JSON array.
///
/// Streams output directly to a `Write` implementation to avoid buffering all segments in
/// memory, and opens the array lazily so a zero-segment run still produces valid JSON (`[]`).
pub struct JsonArrayEncoder<W: Write> {
    w: W,
    started: bool,
    first: bool,
    closed: bool,
}

impl<W: Write> JsonArrayEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            started: false,
            first: true,
            closed: false,
        }
    }

    fn start_if_needed(&mut self) -> Result<()> {
        if !self.started {
            self.w.write_all(b"[")?;
            self.started = true;
        }
        Ok(())
    }
}

impl<W: Write> SegmentEncoder for JsonArrayEncoder<W> {
    fn write_segment(&mut self, seg: &TranscriptionSegment) -> Result<()> {
        if self.closed {
            return Err(crate::error::Error::runtime(
                "cannot write segment: encoder is already closed",
            ));
        }

        self.start_if_needed()?;

        if !self.first {
            self.w.write_all(b",")?;
        }
        self.first = false;

        serde_json::to_writer(&mut self.w, seg)?;

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.start_if_needed()?;
        self.w.write_all(b"]")?;
        self.w.flush()?;

        self.closed = true;
        Ok(())
    }
}
