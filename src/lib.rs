//! Polyphonic supersaw synthesizer: a 16-voice pool of detuned unison
//! stacks, three pitched one-shot sample layers, and a serial FX chain
//! (chorus, feedback delay with tap distortion, reverb, master gain), all
//! driven by one flat parameter store and rendered block-by-block inside a
//! real-time audio callback.

pub mod engine {
  pub mod error;
  pub mod messages;
  pub mod params;
  pub mod presets;
  pub mod voice;
  pub mod layers;
  pub mod dsp;
  pub mod meter;
  pub mod synth;
  pub mod audio;
}
pub mod loader;

pub use engine::audio::AudioEngine;
pub use engine::error::EngineError;
pub use engine::layers::{LayerEngine, SampleBuffer, NUM_LAYERS};
pub use engine::messages::EngineMsg;
pub use engine::meter::OutputMeter;
pub use engine::params::{ParamStore, PatchSnapshot, PARAM_SPECS};
pub use engine::presets::FACTORY_PRESETS;
pub use engine::synth::Synth;
pub use engine::voice::{VoicePool, NUM_VOICES};
