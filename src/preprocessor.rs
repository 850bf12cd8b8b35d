//! Preprocessing: downmix, resample, normalize, denoise, and silence-trim a decoded buffer
//! before it is handed to the chunker.
//!
//! Each stage operates on the whole buffer rather than streaming, since by the time audio
//! reaches here it has already been fully decoded into memory by the decoder.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use rustfft::{FftPlanner, num_complex::Complex};

use crate::config::ProcessingConfig;
use crate::decoder::DecodedAudio;
use crate::error::{Error, Result};

const NOISE_PROFILE_WINDOW_SECONDS: f32 = 0.5;
const NOISE_GATE_MULTIPLIER: f32 = 2.0;
const STFT_FRAME_SIZE: usize = 2048;
const STFT_HOP_SIZE: usize = 512;

const VAD_WINDOW_MS: u32 = 10;
const VAD_MIN_SILENCE_MS: u32 = 1_000;
const VAD_KEEP_SILENCE_MS: u32 = 200;
const VAD_GAP_MS: u32 = 100;
const VAD_THRESHOLD_OFFSET_DB: f32 = 14.0;

pub struct PreprocessedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_seconds: f32,
}

/// Run the full preprocessing chain described by `processing` over `decoded`.
pub fn preprocess(decoded: &DecodedAudio, processing: &ProcessingConfig) -> Result<PreprocessedAudio> {
    let mono = downmix_to_mono(&decoded.interleaved_samples, decoded.channels);
    let mut samples = resample(&mono, decoded.sample_rate, processing.target_sample_rate)?;

    normalize_peak(&mut samples);

    if processing.noise_reduction {
        samples = reduce_noise(&samples, processing.target_sample_rate);
    }

    if processing.vad_enabled {
        samples = trim_silence(&samples, processing.target_sample_rate);
    }

    if samples.is_empty() {
        return Err(Error::input("no speech remained after preprocessing"));
    }

    let duration_seconds = samples.len() as f32 / processing.target_sample_rate as f32;
    Ok(PreprocessedAudio {
        samples,
        sample_rate: processing.target_sample_rate,
        duration_seconds,
    })
}

/// Equal-weight average across channels.
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for f in 0..frames {
        let base = f * channels;
        let acc: f32 = interleaved[base..base + channels].iter().sum();
        mono.push(acc / channels as f32);
    }
    mono
}

fn resample(mono: &[f32], src_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if src_rate == target_rate || mono.is_empty() {
        return Ok(mono.to_vec());
    }

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / src_rate as f64,
        2.0,
        SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
        2048,
        1,
    )
    .map_err(|e| Error::runtime(format!("failed to init resampler: {e}")))?;

    let in_max = resampler.input_frames_max();
    let mut input = mono.to_vec();
    let rem = input.len() % in_max;
    if rem != 0 {
        input.resize(input.len() + (in_max - rem), 0.0);
    }

    let mut out = Vec::with_capacity(input.len() * target_rate as usize / src_rate as usize);
    for block in input.chunks(in_max) {
        let produced = resampler
            .process(&[block.to_vec()], None)
            .map_err(|e| Error::runtime(format!("resampler process failed: {e}")))?;
        out.extend_from_slice(&produced[0]);
    }

    Ok(out)
}

/// Scale so the loudest sample sits at unity, leaving silence alone.
fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        let scale = 1.0 / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// Spectral-gating noise reduction: estimate a per-bin noise floor from the first half
/// second of audio, then zero any STFT bin in any frame that stays below twice that floor.
fn reduce_noise(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    if samples.len() < STFT_FRAME_SIZE {
        return samples.to_vec();
    }

    let window = hann_window(STFT_FRAME_SIZE);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(STFT_FRAME_SIZE);
    let ifft = planner.plan_fft_inverse(STFT_FRAME_SIZE);

    let n_bins = STFT_FRAME_SIZE / 2 + 1;
    let noise_profile_frames = ((NOISE_PROFILE_WINDOW_SECONDS * sample_rate as f32) as usize)
        .saturating_sub(STFT_FRAME_SIZE)
        / STFT_HOP_SIZE
        + 1;

    let mut noise_samples_per_bin: Vec<Vec<f32>> = vec![Vec::new(); n_bins];
    let mut frame_magnitudes: Vec<Vec<f32>> = Vec::new();
    let mut frame_spectra: Vec<Vec<Complex<f32>>> = Vec::new();

    let mut pos = 0usize;
    let mut frame_index = 0usize;
    while pos + STFT_FRAME_SIZE <= samples.len() {
        let mut buf: Vec<Complex<f32>> = samples[pos..pos + STFT_FRAME_SIZE]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buf);

        let magnitudes: Vec<f32> = buf.iter().take(n_bins).map(|c| c.norm()).collect();
        if frame_index < noise_profile_frames {
            for (bin, mag) in magnitudes.iter().enumerate() {
                noise_samples_per_bin[bin].push(*mag);
            }
        }
        frame_magnitudes.push(magnitudes);
        frame_spectra.push(buf);

        pos += STFT_HOP_SIZE;
        frame_index += 1;
    }

    let noise_floor: Vec<f32> = noise_samples_per_bin.iter().map(|bin| median(bin)).collect();
    let gate_threshold: Vec<f32> = noise_floor.iter().map(|f| f * NOISE_GATE_MULTIPLIER).collect();

    let mut out = vec![0.0f32; samples.len()];
    let mut weight = vec![0.0f32; samples.len()];

    for (i, spectrum) in frame_spectra.iter_mut().enumerate() {
        for (bin, threshold) in gate_threshold.iter().enumerate() {
            if frame_magnitudes[i][bin] < *threshold {
                spectrum[bin] = Complex::new(0.0, 0.0);
                if bin != 0 && bin != n_bins - 1 {
                    spectrum[STFT_FRAME_SIZE - bin] = Complex::new(0.0, 0.0);
                }
            }
        }

        ifft.process(spectrum);
        let start = i * STFT_HOP_SIZE;
        for (j, sample) in spectrum.iter().enumerate() {
            let scale = sample.re / STFT_FRAME_SIZE as f32;
            out[start + j] += scale * window[j];
            weight[start + j] += window[j] * window[j];
        }
    }

    for (s, w) in out.iter_mut().zip(weight.iter()) {
        if *w > 1e-6 {
            *s /= w;
        }
    }

    out
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos())
        .collect()
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Drop long stretches of silence, keeping a pad of audio around each speech run and
/// rejoining the remaining runs with short silent gaps.
///
/// Mirrors a `split_on_silence`-style policy: a run of audio below `silence_thresh` for at
/// least [`VAD_MIN_SILENCE_MS`] is treated as silence and removed, except for
/// [`VAD_KEEP_SILENCE_MS`] kept at each edge.
fn trim_silence(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let window_samples = ((sample_rate as u64 * VAD_WINDOW_MS as u64) / 1000).max(1) as usize;
    if samples.len() < window_samples {
        return samples.to_vec();
    }

    let overall_dbfs = dbfs(rms(samples));
    let silence_thresh = overall_dbfs - VAD_THRESHOLD_OFFSET_DB;

    let windows: Vec<bool> = samples
        .chunks(window_samples)
        .map(|w| dbfs(rms(w)) < silence_thresh)
        .collect();

    let min_silence_windows = (VAD_MIN_SILENCE_MS / VAD_WINDOW_MS).max(1) as usize;
    let keep_windows = (VAD_KEEP_SILENCE_MS / VAD_WINDOW_MS).max(1) as usize;

    // Speech spans, each a half-open window-index range, with padding already applied and
    // merged where padding causes overlap.
    let mut speech_spans: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < windows.len() {
        if windows[i] {
            let mut run_end = i;
            while run_end < windows.len() && windows[run_end] {
                run_end += 1;
            }
            if run_end - i < min_silence_windows {
                // Too short to count as real silence; keep it as part of the surrounding speech.
                match speech_spans.last_mut() {
                    Some((_, last_end)) if i <= *last_end => *last_end = run_end,
                    _ => speech_spans.push((i, run_end)),
                }
            }
            i = run_end;
        } else {
            let start = i;
            while i < windows.len() && !windows[i] {
                i += 1;
            }
            let padded_start = start.saturating_sub(keep_windows);
            let padded_end = (i + keep_windows).min(windows.len());
            match speech_spans.last_mut() {
                Some((_, last_end)) if padded_start <= *last_end => *last_end = padded_end,
                _ => speech_spans.push((padded_start, padded_end)),
            }
        }
    }

    if speech_spans.is_empty() {
        return samples.to_vec();
    }

    let gap = vec![0.0f32; ((sample_rate as u64 * VAD_GAP_MS as u64) / 1000) as usize];
    let mut out = Vec::new();
    for (idx, (start, end)) in speech_spans.iter().enumerate() {
        let sample_start = start * window_samples;
        let sample_end = (*end * window_samples).min(samples.len());
        if idx > 0 {
            out.extend_from_slice(&gap);
        }
        out.extend_from_slice(&samples[sample_start..sample_end]);
    }

    out
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn dbfs(amplitude: f32) -> f32 {
    if amplitude <= 1e-9 { -120.0 } else { 20.0 * amplitude.log10() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let interleaved = vec![1.0, 3.0, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&interleaved, 2), vec![2.0, 0.0]);
    }

    #[test]
    fn downmix_is_identity_for_mono() {
        let mono = vec![0.1, -0.2, 0.3];
        assert_eq!(downmix_to_mono(&mono, 1), mono);
    }

    #[test]
    fn resample_is_noop_when_rates_match() {
        let mono = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&mono, 16_000, 16_000).unwrap(), mono);
    }

    #[test]
    fn normalize_peak_scales_down_clipping_audio() {
        let mut samples = vec![0.5, -2.0, 1.0];
        normalize_peak(&mut samples);
        assert!(samples.iter().all(|s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn normalize_peak_leaves_quiet_audio_untouched() {
        let mut samples = vec![0.1, -0.2, 0.05];
        let before = samples.clone();
        normalize_peak(&mut samples);
        assert_eq!(samples, before);
    }

    #[test]
    fn median_of_empty_is_zero() {
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&[1.0, 3.0, 2.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn trim_silence_keeps_loud_signal_roughly_intact() {
        let sample_rate = 16_000;
        let tone: Vec<f32> = (0..sample_rate * 2)
            .map(|i| (i as f32 * 0.05).sin() * 0.8)
            .collect();
        let trimmed = trim_silence(&tone, sample_rate);
        assert!(!trimmed.is_empty());
    }

    #[test]
    fn trim_silence_drops_long_silent_stretch() {
        let sample_rate = 16_000u32;
        let tone: Vec<f32> = (0..sample_rate / 2)
            .map(|i| (i as f32 * 0.05).sin() * 0.8)
            .collect();
        let silence = vec![0.0f32; (sample_rate as usize) * 2];
        let mut audio = tone.clone();
        audio.extend_from_slice(&silence);
        audio.extend_from_slice(&tone);

        let trimmed = trim_silence(&audio, sample_rate);
        assert!(trimmed.len() < audio.len());
    }

    #[test]
    fn trim_silence_keeps_short_pause_below_minimum_duration() {
        // A 300ms gap is well under VAD_MIN_SILENCE_MS (1000ms), so it should be kept as part
        // of the surrounding speech rather than trimmed away like a real pause.
        let sample_rate = 16_000u32;
        let tone: Vec<f32> = (0..sample_rate / 2)
            .map(|i| (i as f32 * 0.05).sin() * 0.8)
            .collect();
        let short_gap = vec![0.0f32; (sample_rate as usize * 3) / 10];
        let mut audio = tone.clone();
        audio.extend_from_slice(&short_gap);
        audio.extend_from_slice(&tone);

        let trimmed = trim_silence(&audio, sample_rate);
        assert!(trimmed.len() as f32 >= audio.len() as f32 * 0.9);
    }

    #[test]
    fn reduce_noise_preserves_length_when_above_frame_size() {
        let sample_rate = 16_000;
        let tone: Vec<f32> = (0..sample_rate)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let denoised = reduce_noise(&tone, sample_rate);
        assert_eq!(denoised.len(), tone.len());
    }

    #[test]
    fn reduce_noise_passes_through_short_buffers() {
        let short = vec![0.1f32; 10];
        assert_eq!(reduce_noise(&short, 16_000), short);
    }
}
