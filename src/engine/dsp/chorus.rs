// Stereo chorus: one delay-line pair modulated by a quadrature LFO pair.
// Base delay sits at 7 ms; depth opens up to 8 ms of unipolar modulation.

const BASE_MS: f32 = 7.0;
const MOD_MS: f32 = 8.0;

pub struct StereoChorus {
  buf_l: Vec<f32>,
  buf_r: Vec<f32>,
  wr: usize,
  len: usize,
  phase_l: f32,
  phase_r: f32,
}

impl StereoChorus {
  pub fn new(sr: f32) -> Self {
    // base + full modulation + interpolation slack
    let len = ((((BASE_MS + MOD_MS) * 1.5 / 1000.0) * sr).ceil().max(64.0)) as usize;
    Self {
      buf_l: vec![0.0; len],
      buf_r: vec![0.0; len],
      wr: 0,
      len,
      // LFO phases are normalized cycles in [0,1); right runs 90 degrees off
      phase_l: 0.0,
      phase_r: 0.25,
    }
  }

  // Fractional ring read, linear between the two bracketing slots.
  #[inline]
  fn read_at(buf: &[f32], pos: f32) -> f32 {
    let n = buf.len() as i32;
    let whole = pos.floor();
    let t = pos - whole;
    let a = buf[(whole as i32).rem_euclid(n) as usize];
    let b = buf[(whole as i32 + 1).rem_euclid(n) as usize];
    a + (b - a) * t
  }

  #[inline]
  pub fn process_one(&mut self, l: f32, r: f32, sr: f32, rate_hz: f32, depth: f32, mix: f32) -> (f32, f32) {
    let mix = mix.clamp(0.0, 1.0);
    let depth_ms = depth.clamp(0.0, 1.0) * MOD_MS;

    self.buf_l[self.wr] = l;
    self.buf_r[self.wr] = r;

    // Unipolar modulation keeps both taps at or behind the base delay
    let base = (BASE_MS / 1000.0) * sr;
    let span = (depth_ms / 1000.0) * sr;
    let lfo_l = (core::f32::consts::TAU * self.phase_l).sin() * 0.5 + 0.5;
    let lfo_r = (core::f32::consts::TAU * self.phase_r).sin() * 0.5 + 0.5;
    let yl = Self::read_at(&self.buf_l, self.wr as f32 - (base + lfo_l * span));
    let yr = Self::read_at(&self.buf_r, self.wr as f32 - (base + lfo_r * span));

    let dp = rate_hz / sr;
    self.phase_l = (self.phase_l + dp).fract();
    self.phase_r = (self.phase_r + dp).fract();
    self.wr += 1;
    if self.wr >= self.len { self.wr = 0; }

    (l * (1.0 - mix) + yl * mix, r * (1.0 - mix) + yr * mix)
  }
}
