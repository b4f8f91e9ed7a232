use freeverb::Freeverb;

use super::undenormal;

// Freeverb run fully wet; the stage crossfades dry/wet itself so a zero mix
// is an exact bypass no matter how the core scales its taps. Width and dry
// level are fixed at prepare, size/damp follow the parameters per block.

pub struct ReverbStage {
  rv: Freeverb,
}

impl ReverbStage {
  pub fn new(sr: f32) -> Self {
    let mut rv = Freeverb::new(sr as usize);
    rv.set_wet(1.0);
    rv.set_dry(0.0);
    rv.set_width(0.85);
    rv.set_room_size(0.5);
    rv.set_dampening(0.35);
    Self { rv }
  }

  pub fn set_room(&mut self, size: f32, damp: f32) {
    self.rv.set_room_size(size as f64);
    self.rv.set_dampening(damp as f64);
  }

  #[inline]
  pub fn tick(&mut self, l: f32, r: f32, mix: f32) -> (f32, f32) {
    let (wl, wr) = self.rv.tick((l as f64, r as f64));
    let wl = undenormal(wl as f32);
    let wr = undenormal(wr as f32);
    (l * (1.0 - mix) + wl * mix, r * (1.0 - mix) + wr * mix)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mix_zero_is_exact_passthrough() {
    let mut rv = ReverbStage::new(44100.0);
    for n in 0..512 {
      let x = ((n as f32) * 0.11).sin() * 0.7;
      let (l, r) = rv.tick(x, -x, 0.0);
      assert_eq!(l, x);
      assert_eq!(r, -x);
    }
  }

  #[test]
  fn impulse_grows_a_tail() {
    let mut rv = ReverbStage::new(44100.0);
    rv.set_room(0.8, 0.2);
    rv.tick(1.0, 1.0, 1.0);
    let mut energy = 0.0f32;
    for _ in 0..4000 {
      let (l, r) = rv.tick(0.0, 0.0, 1.0);
      energy += l.abs() + r.abs();
    }
    assert!(energy > 0.0, "reverb produced no tail");
  }
}
