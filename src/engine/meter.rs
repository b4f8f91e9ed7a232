use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

// Peaks travel bit-cast through AtomicU32: the render thread stores once per
// block, any other thread polls. Relaxed ordering; the values are advisory.

#[derive(Default)]
pub struct OutputMeter {
  peak_l: AtomicU32,
  peak_r: AtomicU32,
  voices: AtomicUsize,
}

impl OutputMeter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store_block(&self, peak_l: f32, peak_r: f32, voices: usize) {
    self.peak_l.store(peak_l.to_bits(), Ordering::Relaxed);
    self.peak_r.store(peak_r.to_bits(), Ordering::Relaxed);
    self.voices.store(voices, Ordering::Relaxed);
  }

  pub fn peaks(&self) -> (f32, f32) {
    (
      f32::from_bits(self.peak_l.load(Ordering::Relaxed)),
      f32::from_bits(self.peak_r.load(Ordering::Relaxed)),
    )
  }

  pub fn active_voices(&self) -> usize {
    self.voices.load(Ordering::Relaxed)
  }
}
