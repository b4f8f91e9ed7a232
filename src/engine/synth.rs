use std::sync::Arc;

use crate::engine::dsp::{chorus::StereoChorus, delay::DelayDist, reverb::ReverbStage};
use crate::engine::error::EngineError;
use crate::engine::layers::{LayerEngine, SampleBuffer, NUM_LAYERS};
use crate::engine::meter::OutputMeter;
use crate::engine::params::{hash_path, ParamStore, PatchSnapshot};
use crate::engine::presets;
use crate::engine::voice::{VoicePool, NUM_VOICES};

// Hashed ids resolved once at construction; the per-block reads below never
// touch a string.
struct ParamKeys {
  master_gain_db: u64,
  osc1_enabled: u64,
  osc1_voices: u64,
  osc1_detune: u64,
  osc1_level: u64,
  layer_enabled: [u64; NUM_LAYERS],
  layer_gain: [u64; NUM_LAYERS],
  layer_start_rand: [u64; NUM_LAYERS],
  chorus_mix: u64,
  chorus_rate: u64,
  chorus_depth: u64,
  delay_mix: u64,
  delay_time_ms: u64,
  delay_feedback: u64,
  dist_mix: u64,
  dist_drive: u64,
  dist_tone: u64,
  reverb_mix: u64,
  reverb_size: u64,
  reverb_damp: u64,
}

impl ParamKeys {
  fn new() -> Self {
    let p = hash_path;
    Self {
      master_gain_db: p("master/gain_db"),
      osc1_enabled: p("osc1/enabled"),
      osc1_voices: p("osc1/voices"),
      osc1_detune: p("osc1/detune"),
      osc1_level: p("osc1/level"),
      layer_enabled: [p("layer1/enabled"), p("layer2/enabled"), p("layer3/enabled")],
      layer_gain: [p("layer1/gain"), p("layer2/gain"), p("layer3/gain")],
      layer_start_rand: [
        p("layer1/start_rand"),
        p("layer2/start_rand"),
        p("layer3/start_rand"),
      ],
      chorus_mix: p("chorus/mix"),
      chorus_rate: p("chorus/rate"),
      chorus_depth: p("chorus/depth"),
      delay_mix: p("delay/mix"),
      delay_time_ms: p("delay/time_ms"),
      delay_feedback: p("delay/feedback"),
      dist_mix: p("dist/mix"),
      dist_drive: p("dist/drive"),
      dist_tone: p("dist/tone"),
      reverb_mix: p("reverb/mix"),
      reverb_size: p("reverb/size"),
      reverb_damp: p("reverb/damp"),
    }
  }
}

/// The whole instrument: voice pool, sample layers, serial FX chain, master
/// gain, driven by one parameter store. `prepare` must succeed before
/// `render_block` produces anything but silence.
pub struct Synth {
  params: ParamStore,
  keys: ParamKeys,
  pool: VoicePool,
  layers: LayerEngine,
  chorus: Option<StereoChorus>,
  delay: DelayDist,
  reverb: Option<ReverbStage>,
  meter: Arc<OutputMeter>,
  sr: f32,
  max_block: usize,
  channels: usize,
}

impl Synth {
  pub fn new() -> Self {
    Self {
      params: ParamStore::with_defaults(),
      keys: ParamKeys::new(),
      pool: VoicePool::new(NUM_VOICES),
      layers: LayerEngine::new(),
      chorus: None,
      delay: DelayDist::new(),
      reverb: None,
      meter: Arc::new(OutputMeter::new()),
      sr: 0.0,
      max_block: 0,
      channels: 0,
    }
  }

  /// Sizes every buffer and resets playback state. Parameter values survive.
  /// Re-callable on a rate change; invalid arguments leave the prior state
  /// fully intact.
  pub fn prepare(&mut self, sample_rate: f32, max_block: usize, channels: usize) -> Result<(), EngineError> {
    if sample_rate <= 0.0 || !sample_rate.is_finite() || max_block == 0 || channels == 0 {
      return Err(EngineError::InvalidPrepare { sample_rate, max_block, channels });
    }
    self.sr = sample_rate;
    self.max_block = max_block;
    self.channels = channels;
    self.pool.prepare(sample_rate);
    self.layers.prepare(sample_rate);
    self.delay.prepare(sample_rate, channels);
    self.chorus = Some(StereoChorus::new(sample_rate));
    self.reverb = Some(ReverbStage::new(sample_rate));
    Ok(())
  }

  pub fn sample_rate(&self) -> f32 { self.sr }
  pub fn channels(&self) -> usize { self.channels }
  pub fn max_block(&self) -> usize { self.max_block }

  pub fn meter(&self) -> Arc<OutputMeter> { self.meter.clone() }

  pub fn set_param(&mut self, path: &str, value: f32) -> Result<f32, EngineError> {
    self.params.set(path, value)
  }

  pub fn get_param(&self, path: &str) -> Result<f32, EngineError> {
    self.params.get(path)
  }

  pub fn apply_preset(&mut self, index: usize) -> Result<(), EngineError> {
    presets::apply(&mut self.params, index)
  }

  pub fn snapshot(&self) -> PatchSnapshot {
    self.params.snapshot()
  }

  pub fn restore(&mut self, snap: &PatchSnapshot) -> Result<(), EngineError> {
    self.params.restore(snap)
  }

  /// Notes outside 0..=127 are a silent no-op. Claims an oscillator voice and
  /// one layer cursor per enabled layer mapping the note.
  pub fn note_on(&mut self, note: u8, vel: f32) {
    if note > 127 {
      return;
    }
    let vel = vel.clamp(0.0, 1.0);
    self.pool.note_on(note, vel);

    let mut enabled = [false; NUM_LAYERS];
    let mut start_rand = [0.0f32; NUM_LAYERS];
    for l in 0..NUM_LAYERS {
      enabled[l] = self.params.get_bool_h(self.keys.layer_enabled[l], false);
      start_rand[l] = self.params.get_f32_h(self.keys.layer_start_rand[l], 0.0);
    }
    self.layers.note_on(note, vel, enabled, start_rand);
  }

  /// `allow_tail` releases through the envelope; `false` stops dead and also
  /// cuts any layer cursors still playing the note.
  pub fn note_off(&mut self, note: u8, allow_tail: bool) {
    self.pool.note_off(note, allow_tail);
    self.layers.note_off(note, allow_tail);
  }

  /// Releases everything with tails; one-shot cursors run out on their own.
  pub fn all_notes_off(&mut self) {
    self.pool.all_off(true);
  }

  /// Maps (or unmaps with `None`) a decoded buffer onto one layer's note
  /// slot. Returns the buffer that was there so a real-time caller can hand
  /// the drop to another thread.
  pub fn set_layer_sample(
    &mut self,
    layer: usize,
    note: u8,
    buf: Option<Arc<SampleBuffer>>,
  ) -> Result<Option<Arc<SampleBuffer>>, EngineError> {
    self.layers.set_sample(layer, note, buf)
  }

  /// Renders one interleaved block: clear, mix voices, mix layers, chorus,
  /// delay/distortion, reverb (stereo only), master gain. The slice is fully
  /// overwritten. All coefficients are read once up front.
  pub fn render_block(&mut self, out: &mut [f32]) {
    if self.channels == 0 {
      out.fill(0.0);
      return;
    }
    debug_assert!(out.len() <= self.max_block * self.channels);
    let channels = self.channels;
    let sr = self.sr;
    let k = &self.keys;
    let p = &self.params;

    let osc_on = p.get_bool_h(k.osc1_enabled, true);
    let unison = p.get_f32_h(k.osc1_voices, 16.0).round() as usize;
    let detune = p.get_f32_h(k.osc1_detune, 55.0);
    let level = if osc_on { p.get_f32_h(k.osc1_level, 0.85) } else { 0.0 };

    let mut layer_gains = [0.0f32; NUM_LAYERS];
    for l in 0..NUM_LAYERS {
      if p.get_bool_h(k.layer_enabled[l], false) {
        layer_gains[l] = p.get_f32_h(k.layer_gain[l], 0.0);
      }
    }

    let chorus_mix = p.get_f32_h(k.chorus_mix, 0.0);
    let chorus_rate = p.get_f32_h(k.chorus_rate, 1.5);
    let chorus_depth = p.get_f32_h(k.chorus_depth, 0.5);
    let delay_mix = p.get_f32_h(k.delay_mix, 0.0);
    let delay_time = p.get_f32_h(k.delay_time_ms, 250.0);
    let delay_fb = p.get_f32_h(k.delay_feedback, 0.3);
    let dist_mix = p.get_f32_h(k.dist_mix, 0.0);
    let dist_drive = p.get_f32_h(k.dist_drive, 0.4);
    let dist_tone = p.get_f32_h(k.dist_tone, 0.0);
    let reverb_mix = p.get_f32_h(k.reverb_mix, 0.0);
    let reverb_size = p.get_f32_h(k.reverb_size, 0.5);
    let reverb_damp = p.get_f32_h(k.reverb_damp, 0.35);
    let master = 10.0_f32.powf(p.get_f32_h(k.master_gain_db, 0.0) / 20.0);

    out.fill(0.0);
    self.pool.render(out, channels, unison, detune, level);
    self.layers.render(out, channels, layer_gains);

    if let Some(chorus) = self.chorus.as_mut() {
      for frame in out.chunks_mut(channels) {
        let l = frame[0];
        let r = if frame.len() > 1 { frame[1] } else { l };
        let (ol, or) = chorus.process_one(l, r, sr, chorus_rate, chorus_depth, chorus_mix);
        frame[0] = ol;
        if frame.len() > 1 {
          frame[1] = or;
        }
      }
    }

    self.delay.process_block(
      out, channels, sr, delay_time, delay_fb, delay_mix, dist_mix, dist_drive, dist_tone,
    );

    if channels >= 2 {
      if let Some(reverb) = self.reverb.as_mut() {
        reverb.set_room(reverb_size, reverb_damp);
        for frame in out.chunks_mut(channels) {
          if frame.len() > 1 {
            let (l, r) = reverb.tick(frame[0], frame[1], reverb_mix);
            frame[0] = l;
            frame[1] = r;
          }
        }
      }
    }

    let mut peak_l = 0.0f32;
    let mut peak_r = 0.0f32;
    for frame in out.chunks_mut(channels) {
      for s in frame.iter_mut() {
        *s *= master;
      }
      peak_l = peak_l.max(frame[0].abs());
      if frame.len() > 1 {
        peak_r = peak_r.max(frame[1].abs());
      }
    }
    if channels == 1 {
      peak_r = peak_l;
    }
    self.meter.store_block(peak_l, peak_r, self.pool.active_count());
  }
}

impl Default for Synth {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rustfft::{num_complex::Complex, FftPlanner};
  use std::f32::consts::TAU;

  const SR: f32 = 44100.0;
  const BLOCK: usize = 512;

  // Prepared stereo synth with the whole FX chain bypassed.
  fn dry_synth() -> Synth {
    let mut s = Synth::new();
    s.prepare(SR, BLOCK, 2).unwrap();
    for id in ["chorus/mix", "delay/mix", "reverb/mix"] {
      s.set_param(id, 0.0).unwrap();
    }
    s.set_param("master/gain_db", 0.0).unwrap();
    s
  }

  #[test]
  fn held_note_renders_a_440_hz_fundamental() {
    let mut s = dry_synth();
    // Zero detune collapses the stack to a sine, so the spectral peak is
    // unambiguous and the amplitude holds steady at the sustain level.
    s.set_param("osc1/detune", 0.0).unwrap();
    s.note_on(69, 1.0);

    let mut buf = vec![0.0f32; BLOCK * 2];
    // Past attack and decay
    for _ in 0..16 {
      s.render_block(&mut buf);
    }

    let n = 8192;
    let mut mono = Vec::with_capacity(n);
    while mono.len() < n {
      s.render_block(&mut buf);
      for frame in buf.chunks(2) {
        mono.push(frame[0]);
      }
    }

    let peak = mono.iter().fold(0.0f32, |a, s| a.max(s.abs()));
    assert!(peak > 0.05, "held note rendered near-silence, peak {}", peak);
    assert!(peak <= 1.0, "clipped: peak {}", peak);

    let mut spec: Vec<Complex<f32>> = mono
      .iter()
      .take(n)
      .enumerate()
      .map(|(i, s)| {
        let w = 0.5 - 0.5 * (TAU * i as f32 / n as f32).cos();
        Complex { re: s * w, im: 0.0 }
      })
      .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut spec);

    let mut best = 1;
    let mut best_mag = 0.0f32;
    for (i, v) in spec.iter().enumerate().take(n / 2).skip(1) {
      let m = v.norm_sqr();
      if m > best_mag {
        best_mag = m;
        best = i;
      }
    }
    let freq = best as f32 * SR / n as f32;
    assert!((freq - 440.0).abs() < 12.0, "fundamental at {} Hz", freq);
  }

  #[test]
  fn prepare_validates_and_preserves_prior_state() {
    let mut s = Synth::new();
    s.prepare(SR, BLOCK, 2).unwrap();
    s.set_param("osc1/detune", 72.0).unwrap();
    s.note_on(60, 1.0);

    assert!(matches!(s.prepare(0.0, BLOCK, 2), Err(EngineError::InvalidPrepare { .. })));
    assert!(matches!(s.prepare(SR, 0, 2), Err(EngineError::InvalidPrepare { .. })));
    assert!(matches!(s.prepare(SR, BLOCK, 0), Err(EngineError::InvalidPrepare { .. })));

    assert_eq!(s.get_param("osc1/detune").unwrap(), 72.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    s.render_block(&mut buf);
    assert!(buf.iter().any(|v| *v != 0.0), "voice lost across failed prepare");
  }

  #[test]
  fn unprepared_synth_renders_silence() {
    let mut s = Synth::new();
    s.note_on(69, 1.0);
    let mut buf = vec![0.7f32; 128];
    s.render_block(&mut buf);
    assert!(buf.iter().all(|v| *v == 0.0));
  }

  #[test]
  fn out_of_range_note_is_a_silent_no_op() {
    let mut s = dry_synth();
    s.note_on(200, 1.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    s.render_block(&mut buf);
    assert!(buf.iter().all(|v| *v == 0.0));
    assert_eq!(s.meter().active_voices(), 0);
  }

  #[test]
  fn disabled_oscillator_with_no_samples_is_silent() {
    let mut s = Synth::new();
    s.prepare(SR, BLOCK, 2).unwrap();
    s.set_param("osc1/enabled", 0.0).unwrap();
    s.note_on(60, 1.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    s.render_block(&mut buf);
    // Default FX mixes are nonzero, but the chain maps silence to silence.
    assert!(buf.iter().all(|v| *v == 0.0));
    // The note still holds a voice; it just contributes nothing.
    assert_eq!(s.meter().active_voices(), 1);
  }

  #[test]
  fn layer_sample_plays_through_the_dry_chain() {
    let mut s = dry_synth();
    s.set_param("osc1/enabled", 0.0).unwrap();
    s.set_param("layer1/start_rand", 0.0).unwrap();
    let buf100 = Arc::new(SampleBuffer::new(vec![0.5f32; 100], 1, SR));
    s.set_layer_sample(0, 60, Some(buf100)).unwrap();

    s.note_on(60, 1.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    s.render_block(&mut buf);

    // layer1 gain defaults to 0.8: 100 frames at 0.4 on both channels
    assert!((buf[0] - 0.4).abs() < 1e-6);
    assert!((buf[1] - 0.4).abs() < 1e-6);
    assert!((buf[99 * 2] - 0.4).abs() < 1e-6);
    assert_eq!(buf[100 * 2], 0.0);
  }

  #[test]
  fn master_gain_scales_the_whole_block() {
    let mut s = dry_synth();
    s.set_param("osc1/detune", 0.0).unwrap();
    s.note_on(69, 1.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    for _ in 0..16 {
      s.render_block(&mut buf);
    }
    let loud = buf.iter().fold(0.0f32, |a, v| a.max(v.abs()));

    s.set_param("master/gain_db", -20.0).unwrap();
    s.render_block(&mut buf);
    let quiet = buf.iter().fold(0.0f32, |a, v| a.max(v.abs()));
    // -20 dB is a factor of 10
    assert!((quiet * 10.0 - loud).abs() < loud * 0.05, "loud={} quiet={}", loud, quiet);
  }

  #[test]
  fn meter_reports_the_rendered_peak() {
    let mut s = dry_synth();
    s.set_param("osc1/detune", 0.0).unwrap();
    s.note_on(69, 1.0);
    let mut buf = vec![0.0f32; BLOCK * 2];
    for _ in 0..8 {
      s.render_block(&mut buf);
    }
    let mut want_l = 0.0f32;
    let mut want_r = 0.0f32;
    for frame in buf.chunks(2) {
      want_l = want_l.max(frame[0].abs());
      want_r = want_r.max(frame[1].abs());
    }
    let m = s.meter();
    assert_eq!(m.peaks(), (want_l, want_r));
    assert_eq!(m.active_voices(), 1);
  }

  #[test]
  fn preset_lands_in_the_store() {
    let mut s = dry_synth();
    s.apply_preset(1).unwrap();
    assert_eq!(s.get_param("osc1/voices").unwrap(), 24.0);
    assert_eq!(s.get_param("chorus/mix").unwrap(), 0.55);
    assert!(s.apply_preset(99).is_err());
  }

  #[test]
  fn snapshot_restores_through_the_synth_surface() {
    let mut s = dry_synth();
    s.set_param("dist/drive", 0.9).unwrap();
    let snap = s.snapshot();
    s.set_param("dist/drive", 0.1).unwrap();
    s.restore(&snap).unwrap();
    assert_eq!(s.get_param("dist/drive").unwrap(), 0.9);
  }
}
