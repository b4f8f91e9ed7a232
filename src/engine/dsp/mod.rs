pub mod chorus;
pub mod delay;
pub mod reverb;

/// Flush sub-audible magnitudes to zero before they enter a feedback path;
/// denormals in recirculating state are a CPU cliff.
#[inline]
pub fn undenormal(x: f32) -> f32 {
  if x.abs() < 1.0e-20 { 0.0 } else { x }
}
