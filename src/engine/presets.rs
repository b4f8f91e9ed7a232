use super::error::EngineError;
use super::params::ParamStore;

/// A preset is a delta list: only the ids it names change, everything else
/// keeps its prior value. INIT is a delta too (it does not reset the store).
pub struct Preset {
  pub name: &'static str,
  pub deltas: &'static [(&'static str, f32)],
}

pub static FACTORY_PRESETS: &[Preset] = &[
  Preset {
    name: "INIT - Clean Saw Lead",
    deltas: &[
      ("master/gain_db", 0.0),
      ("osc1/enabled", 1.0),
      ("osc1/voices", 16.0),
      ("osc1/detune", 50.0),
      ("osc1/level", 0.85),
      ("osc2/enabled", 1.0),
      ("osc2/voices", 12.0),
      ("osc2/detune", 45.0),
      ("osc2/level", 0.75),
      ("osc3/enabled", 0.0),
      ("reverb/mix", 0.22),
      ("delay/mix", 0.18),
      ("chorus/mix", 0.30),
    ],
  },
  Preset {
    name: "Rave - Wide SuperSaw Stack",
    deltas: &[
      ("master/gain_db", 0.0),
      ("osc1/enabled", 1.0),
      ("osc1/voices", 24.0),
      ("osc1/detune", 72.0),
      ("osc1/level", 0.88),
      ("osc2/enabled", 1.0),
      ("osc2/voices", 24.0),
      ("osc2/detune", 78.0),
      ("osc2/level", 0.78),
      ("osc3/enabled", 1.0),
      ("osc3/voices", 16.0),
      ("osc3/detune", 60.0),
      ("osc3/level", 0.62),
      ("reverb/mix", 0.28),
      ("delay/mix", 0.26),
      ("chorus/mix", 0.55),
    ],
  },
  Preset {
    name: "Trance - Tight JP-ish Pluck",
    deltas: &[
      ("master/gain_db", 0.0),
      ("osc1/enabled", 1.0),
      ("osc1/voices", 12.0),
      ("osc1/detune", 40.0),
      ("osc1/level", 0.80),
      ("osc2/enabled", 0.0),
      ("osc3/enabled", 1.0),
      ("osc3/voices", 8.0),
      ("osc3/detune", 18.0),
      ("osc3/level", 0.55),
      ("reverb/mix", 0.14),
      ("delay/mix", 0.18),
      ("chorus/mix", 0.25),
      ("mono/enabled", 1.0),
      ("mono/legato", 1.0),
      ("mono/portamento", 0.55),
    ],
  },
  Preset {
    name: "Hard Dance - Aggressive Stack",
    deltas: &[
      ("master/gain_db", 2.0),
      ("osc1/enabled", 1.0),
      ("osc1/voices", 20.0),
      ("osc1/detune", 65.0),
      ("osc1/level", 0.90),
      ("osc2/enabled", 1.0),
      ("osc2/voices", 18.0),
      ("osc2/detune", 70.0),
      ("osc2/level", 0.85),
      ("osc3/enabled", 0.0),
      ("reverb/mix", 0.20),
      ("delay/mix", 0.15),
      ("chorus/mix", 0.40),
      ("dist/mix", 0.35),
    ],
  },
];

/// Applies one factory preset. Callers apply between render blocks, so the
/// delta lands atomically with respect to audio.
pub fn apply(store: &mut ParamStore, index: usize) -> Result<(), EngineError> {
  let preset = FACTORY_PRESETS.get(index).ok_or(EngineError::PresetOutOfRange {
    index,
    count: FACTORY_PRESETS.len(),
  })?;
  for (path, v) in preset.deltas {
    // Delta tables only name registered ids, so this cannot fail in practice.
    store.set(path, *v)?;
  }
  Ok(())
}
