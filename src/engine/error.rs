use thiserror::Error;

/// Errors surfaced at the control boundary. Nothing in the render path
/// constructs these; render-time trouble is clamp-and-continue or silence.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("unknown parameter id '{0}'")]
  UnknownParam(String),

  #[error("preset index {index} out of range ({count} presets)")]
  PresetOutOfRange { index: usize, count: usize },

  #[error("layer index {index} out of range ({count} layers)")]
  LayerOutOfRange { index: usize, count: usize },

  #[error("invalid prepare: sample_rate={sample_rate}, max_block={max_block}, channels={channels}")]
  InvalidPrepare { sample_rate: f32, max_block: usize, channels: usize },

  #[error("could not decode audio file: {0}")]
  Decode(String),
}
