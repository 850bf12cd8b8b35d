use std::io::Write;

use crate::error::Result;
use crate::segment::TranscriptionSegment;
use crate::segment_encoder::SegmentEncoder;

/// A `SegmentEncoder` that writes segments in WebVTT format.
///
/// Writes the `WEBVTT` header lazily on the first segment so a zero-segment run still
/// behaves predictably (`close()` just flushes).
pub struct VttEncoder<W: Write> {
    w: W,
    started: bool,
    closed: bool,
}

impl<W: Write> VttEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            started: false,
            closed: false,
        }
    }

    fn start_if_needed(&mut self) -> Result<()> {
        if !self.started {
            self.w.write_all(b"WEBVTT\n\n")?;
            self.started = true;
        }
        Ok(())
    }
}

impl<W: Write> SegmentEncoder for VttEncoder<W> {
    fn write_segment(&mut self, seg: &TranscriptionSegment) -> Result<()> {
        if self.closed {
            return Err(crate::error::Error::runtime(
                "cannot write segment: encoder is already closed",
            ));
        }

        self.start_if_needed()?;

        let start = format_timestamp(seg.start_seconds, '.');
        let end = format_timestamp(seg.end_seconds, '.');

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

/// Format seconds into a `HH:MM:SS<sep>mmm` timestamp. WebVTT uses `.`, SRT uses `,`.
pub(crate) fn format_timestamp(seconds: f32, sep: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;

    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;

    let s = total_s % 60;
    let total_m = total_s / 60;

    let m = total_m % 60;
    let h = total_m / 60;

    format!("{h:02}:{m:02}:{s:02}{sep}{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_written_once() {
        let mut buf = Vec::new();
        let mut enc = VttEncoder::new(&mut buf);
        enc.write_segment(&TranscriptionSegment::new(0.0, 1.0, "hi")).unwrap();
        enc.write_segment(&TranscriptionSegment::new(1.0, 2.0, "there")).unwrap();
        enc.close().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches("WEBVTT").count(), 1);
    }

    #[test]
    fn timestamp_formatting_rolls_over_minutes_and_hours() {
        assert_eq!(format_timestamp(0.0, '.'), "00:00:00.000");
        assert_eq!(format_timestamp(61.5, '.'), "00:01:01.500");
        assert_eq!(format_timestamp(3661.25, '.'), "01:01:01.250");
    }
}
