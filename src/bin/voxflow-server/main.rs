use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

mod metrics;

use voxflow::config::Config;
use voxflow::core::{Core, InfoReport, ModelRuntimeLoader, HealthReport};
use voxflow::job::{JobSnapshot, JobStatus, TranscriptionRequest};
use voxflow::json_array_encoder::JsonArrayEncoder;
use voxflow::output_type::OutputType;
use voxflow::resource_monitor::ResourceMonitor;
use voxflow::runtime::ModelRuntime;
use voxflow::runtime::whisper::WhisperRuntime;
use voxflow::segment_encoder::SegmentEncoder;
use voxflow::srt_encoder::SrtEncoder;
use voxflow::text_encoder::TextEncoder;
use voxflow::vtt_encoder::VttEncoder;

#[derive(Parser, Debug)]
#[command(name = "voxflow-server")]
#[command(about = "HTTP server for chunked audio transcription")]
struct Params {
    /// Path to a whisper.cpp model file (e.g. `ggml-large-v3.bin`).
    #[arg(short = 'm', long = "model", required = true)]
    model_path: String,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 500 * 1024 * 1024)]
    max_bytes: usize,
}

#[derive(Clone)]
struct AppState {
    core: Arc<Core>,
}

#[derive(Debug, Deserialize)]
struct ResultQuery {
    #[serde(default, alias = "output_type")]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody { error: self.message });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    voxflow::logging::init();

    if let Err(err) = run().await {
        error!(error = ?err, "voxflow-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    if let Err(err) = metrics::init() {
        warn!(error = ?err, "metrics disabled (init failed)");
    }

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let model_path = PathBuf::from(&params.model_path);
    let model_name = model_path
        .file_name()
        .context("model path has no file name")?
        .to_string_lossy()
        .into_owned();
    let model_cache_dir = model_path.parent().unwrap_or_else(|| std::path::Path::new(".")).to_path_buf();

    let mut config = Config::from_env();
    config.model_name = model_name;
    config.model_cache_dir = model_cache_dir;

    let core = Core::bootstrap_with_observer(
        Box::new(WhisperLoader::new()),
        config.clone(),
        Arc::new(metrics::PrometheusOrchestratorObserver),
    )
    .context("failed to initialize voxflow core")?;
    let core = Arc::new(core);

    core.spawn_resource_monitor(ResourceMonitor::new(
        config.max_memory_gb,
        config.max_cpu_percent,
        config.memory_check_interval,
        config.emergency_shutdown_enabled,
        config.device,
    ));

    spawn_active_jobs_sampler(core.clone());
    core.spawn_session_sweep(core.sessions());

    let state = AppState { core };

    let app = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/transcribe", post(transcribe))
        .route("/v1/jobs/{id}", get(job_status))
        .route("/v1/jobs/{id}/result", get(job_result))
        .route("/v1/jobs/{id}/cancel", post(job_cancel))
        .route("/v1/reload", post(reload_model))
        .route("/v1/info", get(info))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(params.max_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Keeps the `voxflow_jobs_active` gauge in sync with the orchestrator's job table. The
/// orchestrator itself has no notion of "gauge", only terminal/non-terminal transitions, so a
/// cheap periodic sample is simpler than threading a decrement callback through every exit path.
fn spawn_active_jobs_sampler(core: Arc<Core>) {
    tokio::spawn(async move {
        loop {
            metrics::set_active_jobs(core.health().active_jobs);
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    });
}

async fn root() -> &'static str {
    "voxflow-server: POST /v1/transcribe (multipart field: file)"
}

async fn healthz(State(state): State<AppState>) -> Json<HealthReportBody> {
    let report = state.core.health();
    Json(HealthReportBody::from(report))
}

#[derive(Debug, Serialize)]
struct HealthReportBody {
    runtime_ready: bool,
    active_jobs: usize,
}

impl From<HealthReport> for HealthReportBody {
    fn from(report: HealthReport) -> Self {
        Self {
            runtime_ready: matches!(report.runtime, voxflow::runtime::RuntimeHealth::Ready),
            active_jobs: report.active_jobs,
        }
    }
}

async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<SubmitResponse>, AppError> {
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut filename = String::from("upload");
    let mut language: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read upload: {e}")))?;
                audio_bytes = Some(bytes.to_vec());
            }
            "language" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read language field: {e}")))?;
                language = Some(text);
            }
            _ => {}
        }
    }

    let audio_bytes = audio_bytes.ok_or_else(|| AppError::bad_request("missing 'file' field"))?;

    let request = TranscriptionRequest {
        audio_bytes,
        filename,
        language,
        include_timestamps: true,
        include_confidence: true,
        system_prompt: None,
        processing: Default::default(),
    };

    let job_id = state.core.submit_file(request).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(SubmitResponse { job_id }))
}

async fn job_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> std::result::Result<Json<JobSnapshot>, AppError> {
    state
        .core
        .get_job(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("unknown job id"))
}

async fn job_result(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<ResultQuery>,
) -> std::result::Result<Response, AppError> {
    let snapshot = state.core.get_job(&id).ok_or_else(|| AppError::not_found("unknown job id"))?;
    if snapshot.status != JobStatus::Completed {
        return Err(AppError::conflict(format!("job is not completed (status: {:?})", snapshot.status)));
    }
    let response = state
        .core
        .get_response(&id)
        .ok_or_else(|| AppError::conflict("job completed but no response is available"))?;

    let output_type = parse_output_type(query.format.as_deref())
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let mut buf = Vec::new();
    let content_type;
    {
        let mut encoder: Box<dyn SegmentEncoder> = match output_type {
            OutputType::Json => {
                content_type = "application/json; charset=utf-8";
                Box::new(JsonArrayEncoder::new(&mut buf))
            }
            OutputType::Vtt => {
                content_type = "text/vtt; charset=utf-8";
                Box::new(VttEncoder::new(&mut buf))
            }
            OutputType::Srt => {
                content_type = "application/x-subrip; charset=utf-8";
                Box::new(SrtEncoder::new(&mut buf))
            }
            OutputType::Text => {
                content_type = "text/plain; charset=utf-8";
                Box::new(TextEncoder::new(&mut buf))
            }
        };
        for segment in &response.segments {
            encoder.write_segment(segment).map_err(|e| AppError::conflict(e.to_string()))?;
        }
        encoder.close().map_err(|e| AppError::conflict(e.to_string()))?;
    }

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        buf,
    )
        .into_response())
}

async fn job_cancel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.core.cancel_job(&id),
    })
}

async fn reload_model(State(state): State<AppState>) -> std::result::Result<StatusCode, AppError> {
    state.core.reload_model().map_err(|e| AppError::conflict(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct InfoBody {
    model_name: String,
    device: String,
    supports_translation: bool,
    supports_language_detection: bool,
    max_context_tokens: u32,
    max_concurrent_requests: usize,
    active_jobs: usize,
}

impl From<InfoReport> for InfoBody {
    fn from(report: InfoReport) -> Self {
        Self {
            model_name: report.model_name,
            device: format!("{:?}", report.device),
            supports_translation: report.runtime_capabilities.supports_translation,
            supports_language_detection: report.runtime_capabilities.supports_language_detection,
            max_context_tokens: report.runtime_capabilities.max_context_tokens,
            max_concurrent_requests: report.max_concurrent_requests,
            active_jobs: report.active_jobs,
        }
    }
}

async fn info(State(state): State<AppState>) -> Json<InfoBody> {
    Json(InfoBody::from(state.core.info()))
}

fn parse_output_type(format: Option<&str>) -> Result<OutputType> {
    match format {
        None => Ok(OutputType::Vtt),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputType::Json),
            "vtt" => Ok(OutputType::Vtt),
            "srt" => Ok(OutputType::Srt),
            "text" | "txt" => Ok(OutputType::Text),
            other => anyhow::bail!("unknown output format '{other}' (expected json, vtt, srt, or text)"),
        },
    }
}

/// Bridges the server's configured model path into [`Core::bootstrap`].
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_output_type_defaults_to_vtt() {
        assert!(matches!(parse_output_type(None).unwrap(), OutputType::Vtt));
    }

    #[test]
    fn parse_output_type_accepts_known_values_case_insensitively() {
        assert!(matches!(parse_output_type(Some(" JSON ")).unwrap(), OutputType::Json));
        assert!(matches!(parse_output_type(Some("srt")).unwrap(), OutputType::Srt));
        assert!(matches!(parse_output_type(Some("txt")).unwrap(), OutputType::Text));
    }

    #[test]
    fn parse_output_type_rejects_unknown_value() {
        let err = parse_output_type(Some("nope")).unwrap_err();
        assert!(err.to_string().contains("unknown output format"));
    }
}
