use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Declared range and default for one parameter. Writes are clamped to
/// [min, max] before they land in the store; nothing downstream re-checks.
pub struct ParamSpec {
  pub path: &'static str,
  pub min: f32,
  pub max: f32,
  pub default: f32,
}

/// Full registry. Boolean-likes are stored as 0.0/1.0 floats.
pub static PARAM_SPECS: &[ParamSpec] = &[
  ParamSpec { path: "master/gain_db", min: -24.0, max: 6.0, default: 0.0 },
  ParamSpec { path: "osc1/enabled", min: 0.0, max: 1.0, default: 1.0 },
  ParamSpec { path: "osc1/voices", min: 1.0, max: 32.0, default: 16.0 },
  ParamSpec { path: "osc1/detune", min: 0.0, max: 100.0, default: 55.0 },
  ParamSpec { path: "osc1/level", min: 0.0, max: 1.0, default: 0.85 },
  ParamSpec { path: "osc2/enabled", min: 0.0, max: 1.0, default: 1.0 },
  ParamSpec { path: "osc2/voices", min: 1.0, max: 32.0, default: 12.0 },
  ParamSpec { path: "osc2/detune", min: 0.0, max: 100.0, default: 45.0 },
  ParamSpec { path: "osc2/level", min: 0.0, max: 1.0, default: 0.75 },
  ParamSpec { path: "osc3/enabled", min: 0.0, max: 1.0, default: 0.0 },
  ParamSpec { path: "osc3/voices", min: 1.0, max: 32.0, default: 12.0 },
  ParamSpec { path: "osc3/detune", min: 0.0, max: 100.0, default: 45.0 },
  ParamSpec { path: "osc3/level", min: 0.0, max: 1.0, default: 0.75 },
  ParamSpec { path: "layer1/enabled", min: 0.0, max: 1.0, default: 1.0 },
  ParamSpec { path: "layer1/gain", min: 0.0, max: 1.0, default: 0.8 },
  ParamSpec { path: "layer1/start_rand", min: 0.0, max: 100.0, default: 35.0 },
  ParamSpec { path: "layer2/enabled", min: 0.0, max: 1.0, default: 1.0 },
  ParamSpec { path: "layer2/gain", min: 0.0, max: 1.0, default: 0.7 },
  ParamSpec { path: "layer2/start_rand", min: 0.0, max: 100.0, default: 45.0 },
  ParamSpec { path: "layer3/enabled", min: 0.0, max: 1.0, default: 0.0 },
  ParamSpec { path: "layer3/gain", min: 0.0, max: 1.0, default: 0.7 },
  ParamSpec { path: "layer3/start_rand", min: 0.0, max: 100.0, default: 45.0 },
  ParamSpec { path: "chorus/mix", min: 0.0, max: 1.0, default: 0.30 },
  ParamSpec { path: "chorus/rate", min: 0.05, max: 10.0, default: 1.5 },
  ParamSpec { path: "chorus/depth", min: 0.0, max: 1.0, default: 0.5 },
  ParamSpec { path: "delay/mix", min: 0.0, max: 1.0, default: 0.18 },
  ParamSpec { path: "delay/time_ms", min: 1.0, max: 800.0, default: 250.0 },
  ParamSpec { path: "delay/feedback", min: 0.0, max: 0.95, default: 0.3 },
  ParamSpec { path: "dist/mix", min: 0.0, max: 1.0, default: 0.26 },
  ParamSpec { path: "dist/drive", min: 0.0, max: 1.0, default: 0.4 },
  ParamSpec { path: "dist/tone", min: -1.0, max: 1.0, default: 0.0 },
  ParamSpec { path: "reverb/mix", min: 0.0, max: 1.0, default: 0.22 },
  ParamSpec { path: "reverb/size", min: 0.0, max: 1.0, default: 0.5 },
  ParamSpec { path: "reverb/damp", min: 0.0, max: 1.0, default: 0.35 },
  ParamSpec { path: "mono/enabled", min: 0.0, max: 1.0, default: 0.0 },
  ParamSpec { path: "mono/legato", min: 0.0, max: 1.0, default: 0.0 },
  ParamSpec { path: "mono/portamento", min: 0.0, max: 1.0, default: 0.0 },
];

static SPEC_BY_HASH: Lazy<HashMap<u64, &'static ParamSpec>> = Lazy::new(|| {
  let m: HashMap<u64, &'static ParamSpec> =
    PARAM_SPECS.iter().map(|s| (fast_hash(s.path), s)).collect();
  debug_assert_eq!(m.len(), PARAM_SPECS.len(), "param path hash collision");
  m
});

/// Flat id -> value snapshot for persistence. BTreeMap keeps the on-disk form
/// stable; restore goes through `set`, so ordering never matters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PatchSnapshot {
  pub params: BTreeMap<String, f32>,
}

#[derive(Clone)]
pub struct ParamStore {
  pub map: HashMap<String, f32>,
  map_h: HashMap<u64, f32>,
}

impl ParamStore {
  /// Store with every registered parameter at its default.
  pub fn with_defaults() -> Self {
    let mut map = HashMap::new();
    let mut map_h = HashMap::new();
    for spec in PARAM_SPECS {
      map.insert(spec.path.to_string(), spec.default);
      map_h.insert(fast_hash(spec.path), spec.default);
    }
    Self { map, map_h }
  }

  /// Clamp-and-set. Unknown ids leave the store untouched.
  /// Returns the value that actually landed.
  pub fn set(&mut self, path: &str, v: f32) -> Result<f32, EngineError> {
    let h = fast_hash(path);
    let spec = SPEC_BY_HASH
      .get(&h)
      .ok_or_else(|| EngineError::UnknownParam(path.to_string()))?;
    let clamped = v.clamp(spec.min, spec.max);
    self.map_h.insert(h, clamped);
    self.map.insert(path.to_string(), clamped);
    Ok(clamped)
  }

  pub fn get(&self, path: &str) -> Result<f32, EngineError> {
    match self.map.get(path) {
      Some(v) => Ok(*v),
      None => Err(EngineError::UnknownParam(path.to_string())),
    }
  }

  pub fn get_f32_h(&self, key: u64, default: f32) -> f32 {
    match self.map_h.get(&key) { Some(v) => *v, None => default }
  }
  pub fn get_bool_h(&self, key: u64, default: bool) -> bool {
    self.get_f32_h(key, if default { 1.0 } else { 0.0 }) >= 0.5
  }

  pub fn snapshot(&self) -> PatchSnapshot {
    PatchSnapshot { params: self.map.iter().map(|(k, v)| (k.clone(), *v)).collect() }
  }

  /// Re-applies a snapshot through `set`, so values are re-clamped and an id
  /// that is not registered fails without partially trashing the store state
  /// already applied before it (each id is independent).
  pub fn restore(&mut self, snap: &PatchSnapshot) -> Result<(), EngineError> {
    for (path, v) in &snap.params {
      self.set(path, *v)?;
    }
    Ok(())
  }
}

#[inline]
fn fast_hash(s: &str) -> u64 {
  // FNV-1a 64-bit
  let mut hash: u64 = 0xcbf29ce484222325; // offset basis
  for b in s.as_bytes() {
    hash ^= *b as u64;
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

// Helper to expose hash for other modules
pub fn hash_path(path: &str) -> u64 { fast_hash(path) }
