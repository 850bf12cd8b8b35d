//! Audio Decoder: turn a byte buffer + filename hint into raw PCM plus metadata.
//!
//! Demuxing and codec decoding are Symphonia's job; this module only orchestrates them and
//! owns the format allowlist and the spill-to-disk threshold. Resampling, downmixing, and
//! normalization are the preprocessor's concern, not this one's.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::io::{MediaSource, ReadOnlySource};
use tempfile::NamedTempFile;

use crate::decode::{decode_packet_and_then, make_decoder_for_track};
use crate::demux::{next_packet, probe_source_and_pick_default_track};
use crate::error::{Error, Result};

/// Containers/codecs this decoder accepts. Anything else is an [`Error::Input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    M4a,
    Webm,
    Ogg,
    Flac,
}

impl AudioFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "m4a" | "mp4" => Some(Self::M4a),
            "webm" => Some(Self::Webm),
            "ogg" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }

    fn hint_extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "mp4",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
        }
    }
}

/// Raw decoded audio plus the metadata the rest of the pipeline needs.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved PCM, still at the source sample rate and channel count.
    pub interleaved_samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
    pub duration_seconds: f32,
    pub format: AudioFormat,
    /// Set when the stream ended before Symphonia expected it to (a truncated file). The
    /// audio decoded so far is still returned.
    pub truncated: bool,
}

pub fn detect_format(filename: &str) -> Result<AudioFormat> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    AudioFormat::from_extension(ext)
        .ok_or_else(|| Error::input(format!("unsupported format: {filename}")))
}

/// Decode `bytes` (named by `filename` for format detection). Files larger than
/// `spill_threshold_bytes` are written to a temp file first and decoded from disk, keeping
/// peak memory bounded for large uploads.
pub fn decode_audio(bytes: &[u8], filename: &str, spill_threshold_bytes: u64) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(Error::input("empty upload"));
    }

    let format = detect_format(filename)?;

    let (source, _spill_guard) = media_source_for(bytes, spill_threshold_bytes)?;

    let (mut reader, track) = probe_source_and_pick_default_track(source, Some(format.hint_extension()))?;

    let track_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::input("stream has no known sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| Error::input("stream has no known channel layout"))?;

    let mut decoder = make_decoder_for_track(&track)?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut truncated = false;

    loop {
        let packet = match next_packet(&mut reader) {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(_) => {
                truncated = true;
                break;
            }
        };

        if packet.track_id() != track.id {
            continue;
        }

        let produced = decode_packet_and_then(&mut decoder, &packet, |decoded| {
            append_interleaved(&decoded, &mut sample_buf, &mut samples);
            Ok(())
        })?;

        if !produced {
            truncated = true;
        }
    }

    if samples.is_empty() {
        return Err(Error::input("no decodable audio in file"));
    }

    let frames = samples.len() / channels.max(1);
    let duration_seconds = frames as f32 / track_rate as f32;

    Ok(DecodedAudio {
        interleaved_samples: samples,
        sample_rate: track_rate,
        channels,
        duration_seconds,
        format,
        truncated,
    })
}

fn append_interleaved(
    decoded: &AudioBufferRef<'_>,
    sample_buf: &mut Option<SampleBuffer<f32>>,
    out: &mut Vec<f32>,
) {
    if sample_buf.is_none() {
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        *sample_buf = Some(SampleBuffer::<f32>::new(duration, spec));
    }
    let buf = sample_buf.as_mut().expect("initialized above");
    buf.copy_interleaved_ref(decoded.clone());
    out.extend_from_slice(buf.samples());
}

/// Returns a `MediaSource` for the given bytes, spilling to a temp file when `bytes` exceeds
/// `spill_threshold_bytes`. The returned `NamedTempFile` guard must outlive the source.
fn media_source_for(
    bytes: &[u8],
    spill_threshold_bytes: u64,
) -> Result<(Box<dyn MediaSource>, Option<NamedTempFile>)> {
    if bytes.len() as u64 <= spill_threshold_bytes {
        let cursor = Cursor::new(bytes.to_vec());
        return Ok((Box::new(ReadOnlySource::new(cursor)), None));
    }

    let mut tmp = NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    let file = File::open(tmp.path())?;
    Ok((Box::new(file), Some(tmp)))
}
