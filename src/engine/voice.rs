// Supersaw voice bank - 16-voice polyphony with deterministic stealing
//
// - Per-voice supersaw: up to 32 free-running detuned unison units
// - Fixed-time ADSR (linear segments), configured at prepare
// - Oldest-triggered stealing via a monotonic serial, hard reset on steal

use std::f64::consts::TAU;

pub const NUM_VOICES: usize = 16;
pub const MAX_UNISON: usize = 32;

// Keeps the stack musically in tune even at full detune
const MAX_SPREAD: f64 = 0.012;

// Envelope times fixed at prepare, matching the plugin-era patch
const ATTACK_S: f32 = 0.002;
const DECAY_S: f32 = 0.12;
const SUSTAIN_LEVEL: f32 = 0.8;
const RELEASE_S: f32 = 0.35;

#[inline]
pub fn midi_to_freq(m: u8) -> f32 {
    440.0 * (2.0_f32).powf((m as f32 - 69.0) / 12.0)
}

// ─── ADSR Envelope ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Debug)]
enum EnvStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

pub struct Adsr {
    stage: EnvStage,
    level: f32,
    sustain: f32,
    attack_rate: f32,
    decay_rate: f32,
    release_rate: f32,
    release_s: f32,
    sr: f32,
}

impl Adsr {
    fn new() -> Self {
        Self {
            stage: EnvStage::Idle,
            level: 0.0,
            sustain: SUSTAIN_LEVEL,
            attack_rate: 0.0,
            decay_rate: 0.0,
            release_rate: 0.0,
            release_s: RELEASE_S,
            sr: 0.0,
        }
    }

    /// Times in seconds, sustain 0..1. Called once per prepare, not per note.
    pub fn configure(&mut self, sr: f32, attack: f32, decay: f32, sustain: f32, release: f32) {
        self.sr = sr;
        self.sustain = sustain.clamp(0.0, 1.0);
        self.attack_rate = 1.0 / (attack.max(0.001) * sr);
        self.decay_rate = (1.0 - self.sustain) / (decay.max(0.001) * sr);
        self.release_s = release.max(0.001);
        self.stage = EnvStage::Idle;
        self.level = 0.0;
    }

    pub fn note_on(&mut self) {
        // Attack continues from the current level: click-free on retrigger,
        // and exactly zero on a voice claimed from Idle.
        self.stage = EnvStage::Attack;
    }

    pub fn note_off(&mut self, allow_tail: bool) {
        if !allow_tail || self.level <= 1e-6 {
            self.stage = EnvStage::Idle;
            self.level = 0.0;
            return;
        }
        if self.stage != EnvStage::Idle {
            // Ramp from wherever we are to zero over the full release time.
            self.release_rate = self.level / (self.release_s * self.sr);
            self.stage = EnvStage::Release;
        }
    }

    /// Current gain, then advance one sample. First call after a fresh
    /// note_on therefore reports the pre-attack level.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let out = self.level;
        match self.stage {
            EnvStage::Idle => {
                self.level = 0.0;
            }
            EnvStage::Attack => {
                self.level += self.attack_rate;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvStage::Decay;
                }
            }
            EnvStage::Decay => {
                self.level -= self.decay_rate;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Sustain => {
                self.level = self.sustain;
            }
            EnvStage::Release => {
                self.level -= self.release_rate;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvStage::Idle;
                }
            }
        }
        out
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvStage::Idle
    }
}

// ─── Supersaw Oscillator ────────────────────────────────────────────────────
// Equal-weight stack of sine units spread symmetrically around the base
// pitch. Phases are f64 (they integrate for minutes), sample math is f32.

pub struct SupersawOsc {
    sr: f64,
    phases: [f64; MAX_UNISON],
    freq: f32,
    detune_cents: f32,
    unison: usize,
    gain: f32,
}

impl SupersawOsc {
    fn new() -> Self {
        Self {
            sr: 0.0,
            phases: [0.0; MAX_UNISON],
            freq: 440.0,
            detune_cents: 0.0,
            unison: 8,
            gain: 0.7,
        }
    }

    pub fn prepare(&mut self, sr: f32) {
        self.sr = sr as f64;
        self.phases = [0.0; MAX_UNISON];
    }

    pub fn set_frequency(&mut self, hz: f32) { self.freq = hz; }
    pub fn set_detune_cents(&mut self, cents: f32) { self.detune_cents = cents; }
    pub fn set_gain(&mut self, g: f32) { self.gain = g; }
    pub fn set_unison(&mut self, k: usize) { self.unison = k.clamp(1, MAX_UNISON); }

    #[inline]
    pub fn process(&mut self) -> f32 {
        if self.sr <= 0.0 {
            return 0.0;
        }

        let base_inc = TAU * self.freq as f64 / self.sr;
        let spread = (self.detune_cents as f64 / 100.0) * MAX_SPREAD;
        let k = self.unison;

        let mut acc = 0.0f32;
        for i in 0..k {
            // Symmetric offsets; a single unit sits exactly on pitch
            let offset = if k > 1 {
                spread * (i as f64 / (k - 1) as f64 - 0.5)
            } else {
                0.0
            };
            let p = &mut self.phases[i];
            *p += base_inc * (1.0 + offset);
            if *p >= TAU {
                *p -= TAU;
            }
            acc += (*p as f32).sin();
        }

        acc * (1.0 / k as f32) * self.gain
    }
}

// ─── Voice ──────────────────────────────────────────────────────────────────

pub struct Voice {
    osc: SupersawOsc,
    env: Adsr,
    note: u8,
    velocity: f32,
    serial: u64,
}

impl Voice {
    fn new() -> Self {
        Self {
            osc: SupersawOsc::new(),
            env: Adsr::new(),
            note: 0,
            velocity: 0.0,
            serial: 0,
        }
    }

    fn prepare(&mut self, sr: f32) {
        self.osc.prepare(sr);
        self.env.configure(sr, ATTACK_S, DECAY_S, SUSTAIN_LEVEL, RELEASE_S);
    }

    fn start(&mut self, note: u8, vel: f32, serial: u64) {
        self.note = note;
        self.velocity = vel;
        self.serial = serial;
        self.osc.set_frequency(midi_to_freq(note));
        // Phases free-run across notes for a warmer stack
        self.env.note_on();
    }

    fn stop(&mut self, allow_tail: bool) {
        self.env.note_off(allow_tail);
    }

    fn is_active(&self) -> bool {
        self.env.is_active()
    }

    /// Additive mix into an interleaved buffer, same sample on every channel.
    #[inline]
    fn render(&mut self, out: &mut [f32], channels: usize) {
        if !self.env.is_active() {
            return;
        }
        for frame in out.chunks_mut(channels) {
            let s = self.osc.process() * self.velocity * self.env.next();
            for ch in frame.iter_mut() {
                *ch += s;
            }
        }
    }
}

// ─── Voice Pool ─────────────────────────────────────────────────────────────
// Fixed arena, allocated once. A voice is free iff its envelope is Idle.
// Stealing: smallest trigger serial loses (oldest note), hard reset first.

pub struct VoicePool {
    voices: Vec<Voice>,
    next_serial: u64,
}

impl VoicePool {
    pub fn new(num_voices: usize) -> Self {
        Self {
            voices: (0..num_voices.max(1)).map(|_| Voice::new()).collect(),
            next_serial: 0,
        }
    }

    pub fn prepare(&mut self, sr: f32) {
        for v in &mut self.voices {
            v.prepare(sr);
        }
        self.next_serial = 0;
    }

    /// Claims a voice and returns its index (stable for a given call history).
    pub fn note_on(&mut self, note: u8, vel: f32) -> usize {
        // Re-striking a held note releases the old instance first
        for v in &mut self.voices {
            if v.note == note && v.is_active() {
                v.stop(true);
            }
        }

        let mut idx = None;
        for (i, v) in self.voices.iter().enumerate() {
            if !v.is_active() {
                idx = Some(i);
                break;
            }
        }

        let i = idx.unwrap_or_else(|| {
            let mut oldest_idx = 0;
            let mut oldest_serial = u64::MAX;
            for (i, v) in self.voices.iter().enumerate() {
                if v.serial < oldest_serial {
                    oldest_serial = v.serial;
                    oldest_idx = i;
                }
            }
            self.voices[oldest_idx].stop(false);
            oldest_idx
        });

        let serial = self.next_serial;
        self.next_serial += 1;
        self.voices[i].start(note, vel, serial);
        i
    }

    pub fn note_off(&mut self, note: u8, allow_tail: bool) {
        for v in &mut self.voices {
            if v.note == note && v.is_active() {
                v.stop(allow_tail);
            }
        }
    }

    pub fn all_off(&mut self, allow_tail: bool) {
        for v in &mut self.voices {
            if v.is_active() {
                v.stop(allow_tail);
            }
        }
    }

    pub fn is_sounding(&self, note: u8) -> bool {
        self.voices.iter().any(|v| v.note == note && v.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Applies the oscillator settings for this block, then mixes all active
    /// voices into the interleaved buffer.
    pub fn render(
        &mut self,
        out: &mut [f32],
        channels: usize,
        unison: usize,
        detune_cents: f32,
        level: f32,
    ) {
        for v in &mut self.voices {
            if !v.is_active() {
                continue;
            }
            v.osc.set_unison(unison);
            v.osc.set_detune_cents(detune_cents);
            v.osc.set_gain(level);
            v.render(out, channels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn ready_env() -> Adsr {
        let mut env = Adsr::new();
        env.configure(SR, ATTACK_S, DECAY_S, SUSTAIN_LEVEL, RELEASE_S);
        env
    }

    #[test]
    fn attack_starts_from_zero() {
        let mut env = ready_env();
        env.note_on();
        assert_eq!(env.next(), 0.0);
        assert!(env.next() > 0.0);
    }

    #[test]
    fn envelope_reaches_sustain_after_attack_and_decay() {
        let mut env = ready_env();
        env.note_on();
        let settle = ((ATTACK_S + DECAY_S) * SR) as usize + 100;
        let mut last = 0.0;
        for _ in 0..settle {
            last = env.next();
        }
        assert!((last - SUSTAIN_LEVEL).abs() < 1e-4);
        assert!(env.is_active());
    }

    #[test]
    fn release_completes_to_idle() {
        let mut env = ready_env();
        env.note_on();
        for _ in 0..((ATTACK_S + DECAY_S) * SR) as usize + 100 {
            env.next();
        }
        env.note_off(true);
        assert!(env.is_active());
        for _ in 0..(RELEASE_S * SR) as usize + 100 {
            env.next();
        }
        assert!(!env.is_active());
        assert_eq!(env.next(), 0.0);
    }

    #[test]
    fn hard_note_off_is_immediate() {
        let mut env = ready_env();
        env.note_on();
        for _ in 0..500 {
            env.next();
        }
        env.note_off(false);
        assert!(!env.is_active());
        assert_eq!(env.next(), 0.0);
    }

    #[test]
    fn zero_detune_collapses_to_pure_sine() {
        for k in 1..=MAX_UNISON {
            let mut osc = SupersawOsc::new();
            osc.prepare(SR);
            osc.set_frequency(440.0);
            osc.set_detune_cents(0.0);
            osc.set_unison(k);
            osc.set_gain(1.0);

            let mut phase = 0.0f64;
            let inc = TAU * 440.0 / SR as f64;
            for _ in 0..2048 {
                let got = osc.process();
                phase += inc;
                if phase >= TAU {
                    phase -= TAU;
                }
                let want = (phase as f32).sin();
                assert!((got - want).abs() < 1e-5, "k={} got={} want={}", k, got, want);
            }
        }
    }

    #[test]
    fn unison_count_is_clamped() {
        let mut osc = SupersawOsc::new();
        osc.prepare(SR);
        osc.set_unison(0);
        assert!(osc.process().abs() <= 1.0);
        osc.set_unison(1000);
        assert!(osc.process().abs() <= 1.0);
    }

    #[test]
    fn midi_mapping_is_equal_tempered() {
        assert!((midi_to_freq(69) - 440.0).abs() < 1e-3);
        assert!((midi_to_freq(81) - 880.0).abs() < 1e-2);
        assert!((midi_to_freq(60) - 261.626).abs() < 1e-2);
    }

    #[test]
    fn pool_prefers_idle_voices() {
        let mut pool = VoicePool::new(4);
        pool.prepare(SR);
        assert_eq!(pool.note_on(60, 1.0), 0);
        assert_eq!(pool.note_on(61, 1.0), 1);
        assert_eq!(pool.note_on(62, 1.0), 2);
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn pool_steals_oldest_deterministically() {
        let run = || {
            let mut pool = VoicePool::new(NUM_VOICES);
            pool.prepare(SR);
            let mut claimed = Vec::new();
            for n in 0..=NUM_VOICES as u8 {
                claimed.push(pool.note_on(40 + n, 1.0));
            }
            claimed
        };
        let a = run();
        let b = run();
        assert_eq!(a, b);

        // 17th note claims voice 0, the oldest trigger
        assert_eq!(a[NUM_VOICES], 0);

        let mut pool = VoicePool::new(NUM_VOICES);
        pool.prepare(SR);
        for n in 0..=NUM_VOICES as u8 {
            pool.note_on(40 + n, 1.0);
        }
        assert!(!pool.is_sounding(40), "stolen note must stop sounding");
        assert!(pool.is_sounding(40 + NUM_VOICES as u8));
        assert_eq!(pool.active_count(), NUM_VOICES);

        // Pool keeps rendering after the steal
        let mut buf = vec![0.0f32; 512];
        pool.render(&mut buf, 2, 8, 30.0, 0.8);
        assert!(buf.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn note_off_releases_every_matching_voice() {
        let mut pool = VoicePool::new(8);
        pool.prepare(SR);
        pool.note_on(64, 1.0);
        pool.note_on(67, 1.0);
        pool.note_off(64, false);
        assert!(!pool.is_sounding(64));
        assert!(pool.is_sounding(67));
    }

    #[test]
    fn idle_voice_render_leaves_buffer_untouched() {
        let mut pool = VoicePool::new(2);
        pool.prepare(SR);
        let mut buf = vec![0.25f32; 64];
        pool.render(&mut buf, 2, 8, 0.0, 1.0);
        assert!(buf.iter().all(|s| *s == 0.25));
    }
}
