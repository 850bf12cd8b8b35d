/// The supported output formats for encoded transcription segments.
///
/// Using an enum instead of stringly-typed format flags keeps selection explicit and lets the
/// `cli` feature derive `clap::ValueEnum` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputType {
    /// Output segments as a JSON array.
    Json,
    /// Output segments in WebVTT subtitle format.
    Vtt,
    /// Output segments as numbered SubRip (`.srt`) cues.
    Srt,
    /// Output each segment's text on its own line, with no timing information.
    Text,
}
