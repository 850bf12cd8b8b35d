// src/bin/voxflow-cli.rs

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;

use voxflow::config::Config;
use voxflow::core::{Core, ModelRuntimeLoader};
use voxflow::job::{JobStatus, TranscriptionRequest};
use voxflow::json_array_encoder::JsonArrayEncoder;
use voxflow::output_type::OutputType;
use voxflow::runtime::ModelRuntime;
use voxflow::runtime::whisper::WhisperRuntime;
use voxflow::segment_encoder::SegmentEncoder;
use voxflow::srt_encoder::SrtEncoder;
use voxflow::text_encoder::TextEncoder;
use voxflow::vtt_encoder::VttEncoder;

/// CLI parameters for `voxflow`.
#[derive(Parser, Debug)]
#[command(name = "voxflow")]
#[command(about = "Transcribe an audio file and print the result")]
struct Params {
    /// Path to a whisper.cpp model file (e.g. `ggml-large-v3.bin`).
    #[arg(short = 'm', long = "model", required = true)]
    model_path: String,

    /// Input audio file path.
    #[arg(short = 'i', long = "input", required = true)]
    input: String,

    /// Output format for transcription segments.
    #[arg(short = 'o', long = "output-type", value_enum, default_value_t = OutputType::Vtt)]
    output_type: OutputType,

    /// Optional language hint (e.g. "en", "es"); omit for auto-detection.
    #[arg(short = 'l', long = "language")]
    language: Option<String>,

    /// Disable spectral noise reduction.
    #[arg(long = "no-denoise", default_value_t = false)]
    no_denoise: bool,

    /// Disable silence trimming.
    #[arg(long = "no-vad", default_value_t = false)]
    no_vad: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    voxflow::logging::init();

    let params = Params::parse();

    let audio_bytes = fs::read(&params.input)
        .with_context(|| format!("failed to read input file: {}", params.input))?;
    let filename = PathBuf::from(&params.input)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| params.input.clone());

    let model_path = PathBuf::from(&params.model_path);
    let model_name = model_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("model path has no file name")?;
    let model_cache_dir = model_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::from_env();
    config.model_name = model_name;
    config.model_cache_dir = model_cache_dir;
    config.processing.noise_reduction = !params.no_denoise;
    config.processing.vad_enabled = !params.no_vad;

    let core = Core::bootstrap(Box::new(WhisperLoader::new()), config)
        .context("failed to load the model runtime")?;

    let request = TranscriptionRequest {
        audio_bytes,
        filename,
        language: params.language,
        include_timestamps: true,
        include_confidence: true,
        system_prompt: None,
        processing: Default::default(),
    };

    let job_id = core.submit_file(request)?;

    let snapshot = loop {
        let snapshot = core.get_job(&job_id).context("job disappeared")?;
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    match snapshot.status {
        JobStatus::Completed => {}
        JobStatus::Failed => {
            bail!(
                "transcription failed: {}",
                snapshot.error_message.unwrap_or_default()
            );
        }
        JobStatus::Cancelled => bail!("transcription was cancelled"),
        JobStatus::Pending | JobStatus::Processing => unreachable!("loop only exits on terminal status"),
    }

    let response = core
        .get_response(&job_id)
        .context("completed job has no response")?;

    let stdout = io::stdout();
    let mut encoder: Box<dyn SegmentEncoder> = match params.output_type {
        OutputType::Json => Box::new(JsonArrayEncoder::new(stdout)),
        OutputType::Vtt => Box::new(VttEncoder::new(stdout)),
        OutputType::Srt => Box::new(SrtEncoder::new(stdout)),
        OutputType::Text => Box::new(TextEncoder::new(stdout)),
    };

    for segment in &response.segments {
        encoder.write_segment(segment)?;
    }
    encoder.close()?;
    io::stdout().flush()?;

    Ok(())
}

/// Bridges a CLI-selected whisper model path into [`Core::bootstrap`].
struct WhisperLoader {
    runtime: WhisperRuntime,
}

impl WhisperLoader {
    fn new() -> Self {
        Self {
            runtime: WhisperRuntime::new(),
        }
    }
}

impl ModelRuntimeLoader for WhisperLoader {
    fn load(&mut self, model_name: &str, cache_dir: &std::path::Path) -> voxflow::error::Result<()> {
        self.runtime.load(model_name, cache_dir)
    }

    fn into_runtime(self: Box<Self>) -> Box<dyn ModelRuntime> {
        Box::new(self.runtime)
    }
}
