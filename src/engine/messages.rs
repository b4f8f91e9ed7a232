use std::sync::Arc;

use serde::Deserialize;

use super::layers::SampleBuffer;

/// Control messages drained by the audio callback between render blocks.
/// Sample buffers are decoded before they enter a message, so applying one
/// never allocates on the audio thread.
#[derive(Clone, Debug, Deserialize)]
pub enum EngineMsg {
  SetParam { path: String, value: f32 },
  NoteOn { note: u8, vel: f32 },
  NoteOff { note: u8, allow_tail: bool },
  ApplyPreset { index: usize },
  #[serde(skip)]
  LoadLayerSample { layer: usize, note: u8, buffer: Arc<SampleBuffer> },
  ClearLayerSample { layer: usize, note: u8 },
  AllNotesOff,
  Quit,
}
