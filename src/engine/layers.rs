// Sample layer engine - three pitched per-key sample stacks
//
// Each layer maps 128 MIDI notes to decoded buffers and plays them back
// one-shot through a fixed cursor pool, linear-interpolating between source
// frames for the rate shift. Aliasing at large shifts is accepted.

use std::fmt;
use std::sync::Arc;

use super::error::EngineError;

pub const NUM_LAYERS: usize = 3;
pub const NOTE_SLOTS: usize = 128;
const CURSORS_PER_LAYER: usize = 24;

// ─── Sample buffer ──────────────────────────────────────────────────────────
// Interleaved f32 frames plus the native rate. Immutable after decode and
// shared by Arc, so the render path only ever reads.

#[derive(Clone)]
pub struct SampleBuffer {
    pub data: Vec<f32>,
    pub channels: usize,
    pub sample_rate: f32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f32>, channels: usize, sample_rate: f32) -> Self {
        Self { data, channels: channels.max(1), sample_rate }
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels
    }

    #[inline]
    fn frame_sample(&self, frame: usize, channel: usize) -> f32 {
        let ch = if self.channels == 1 { 0 } else { channel % self.channels };
        self.data[frame * self.channels + ch]
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("frames", &self.frames())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

// ─── Sample layer ───────────────────────────────────────────────────────────

pub struct SampleLayer {
    slots: [Option<Arc<SampleBuffer>>; NOTE_SLOTS],
}

impl SampleLayer {
    fn new() -> Self {
        Self { slots: std::array::from_fn(|_| None) }
    }

    /// Notes outside 0..=127 are ignored. Returns the buffer that was there.
    pub fn set_note(
        &mut self,
        note: u8,
        buf: Option<Arc<SampleBuffer>>,
    ) -> Option<Arc<SampleBuffer>> {
        if note as usize >= NOTE_SLOTS {
            return None;
        }
        std::mem::replace(&mut self.slots[note as usize], buf)
    }

    pub fn has_note(&self, note: u8) -> bool {
        (note as usize) < NOTE_SLOTS && self.slots[note as usize].is_some()
    }

    /// One interpolated sample at a target-rate index. Anything unmapped,
    /// out of range, or past the end is silence, never a fault.
    #[inline]
    pub fn sample_at(&self, note: u8, sample_index: usize, channel: usize, target_rate: f32) -> f32 {
        if note as usize >= NOTE_SLOTS {
            return 0.0;
        }
        let Some(buf) = &self.slots[note as usize] else {
            return 0.0;
        };
        let frames = buf.frames();
        if frames == 0 || buf.sample_rate <= 0.0 || target_rate <= 0.0 {
            return 0.0;
        }

        let ratio = buf.sample_rate as f64 / target_rate as f64;
        let pos = sample_index as f64 * ratio;
        let idx0 = pos as usize;
        if idx0 >= frames {
            return 0.0;
        }
        let frac = (pos - idx0 as f64) as f32;

        let s0 = buf.frame_sample(idx0, channel);
        // Zero-pad past the end rather than clamping
        let s1 = if idx0 + 1 < frames { buf.frame_sample(idx0 + 1, channel) } else { 0.0 };
        s0 + frac * (s1 - s0)
    }

    /// Resampled playback length, for duration bookkeeping.
    pub fn length_in_samples(&self, note: u8, target_rate: f32) -> usize {
        if note as usize >= NOTE_SLOTS {
            return 0;
        }
        let Some(buf) = &self.slots[note as usize] else {
            return 0;
        };
        if buf.sample_rate <= 0.0 {
            return 0;
        }
        (buf.frames() as f64 * (target_rate as f64 / buf.sample_rate as f64)) as usize
    }
}

// ─── Layer engine ───────────────────────────────────────────────────────────
// One-shot cursors: a note-on claims a cursor per enabled layer that maps the
// note; it runs to the resampled end and frees itself. Tail note-offs leave
// cursors alone, hard note-offs kill them. Voices are independent of this.

#[derive(Clone, Copy)]
struct Cursor {
    active: bool,
    note: u8,
    velocity: f32,
    pos: usize,
    end: usize,
    serial: u64,
}

impl Cursor {
    fn idle() -> Self {
        Self { active: false, note: 0, velocity: 0.0, pos: 0, end: 0, serial: 0 }
    }
}

pub struct LayerEngine {
    layers: [SampleLayer; NUM_LAYERS],
    cursors: [[Cursor; CURSORS_PER_LAYER]; NUM_LAYERS],
    target_rate: f32,
    next_serial: u64,
    rng: u32,
}

impl LayerEngine {
    pub fn new() -> Self {
        Self {
            layers: std::array::from_fn(|_| SampleLayer::new()),
            cursors: [[Cursor::idle(); CURSORS_PER_LAYER]; NUM_LAYERS],
            target_rate: 0.0,
            next_serial: 0,
            rng: 0x12345678,
        }
    }

    /// Rate changes invalidate running cursor positions; slot tables survive.
    pub fn prepare(&mut self, target_rate: f32) {
        self.target_rate = target_rate;
        self.cursors = [[Cursor::idle(); CURSORS_PER_LAYER]; NUM_LAYERS];
        self.next_serial = 0;
    }

    /// Swap a note's buffer in (or out with `None`). Cursors already playing
    /// that note on that layer are cut so they never straddle two buffers.
    /// Returns the replaced buffer so a real-time caller can defer the drop.
    pub fn set_sample(
        &mut self,
        layer: usize,
        note: u8,
        buf: Option<Arc<SampleBuffer>>,
    ) -> Result<Option<Arc<SampleBuffer>>, EngineError> {
        if layer >= NUM_LAYERS {
            return Err(EngineError::LayerOutOfRange { index: layer, count: NUM_LAYERS });
        }
        for cur in &mut self.cursors[layer] {
            if cur.active && cur.note == note {
                cur.active = false;
            }
        }
        Ok(self.layers[layer].set_note(note, buf))
    }

    pub fn has_note(&self, layer: usize, note: u8) -> bool {
        layer < NUM_LAYERS && self.layers[layer].has_note(note)
    }

    /// Starts one cursor per enabled layer mapping this note. `start_rand`
    /// is percent of the resampled length the entry point may wander into.
    pub fn note_on(
        &mut self,
        note: u8,
        vel: f32,
        enabled: [bool; NUM_LAYERS],
        start_rand: [f32; NUM_LAYERS],
    ) {
        if self.target_rate <= 0.0 {
            return;
        }
        for l in 0..NUM_LAYERS {
            if !enabled[l] || !self.layers[l].has_note(note) {
                continue;
            }
            let end = self.layers[l].length_in_samples(note, self.target_rate);
            if end == 0 {
                continue;
            }

            // xorshift, same generator the noise sources use
            self.rng ^= self.rng << 13;
            self.rng ^= self.rng >> 17;
            self.rng ^= self.rng << 5;
            let r01 = self.rng as f32 / u32::MAX as f32;
            let span = (start_rand[l] / 100.0).clamp(0.0, 1.0);
            let pos = (r01 * span * end as f32) as usize;

            let slot = self.claim_cursor(l);
            self.cursors[l][slot] = Cursor {
                active: true,
                note,
                velocity: vel,
                pos: pos.min(end.saturating_sub(1)),
                end,
                serial: self.next_serial,
            };
            self.next_serial += 1;
        }
    }

    fn claim_cursor(&mut self, layer: usize) -> usize {
        let mut oldest = 0;
        let mut oldest_serial = u64::MAX;
        for (i, cur) in self.cursors[layer].iter().enumerate() {
            if !cur.active {
                return i;
            }
            if cur.serial < oldest_serial {
                oldest_serial = cur.serial;
                oldest = i;
            }
        }
        oldest
    }

    /// One-shots ignore tail note-offs; a hard stop cuts them.
    pub fn note_off(&mut self, note: u8, allow_tail: bool) {
        if allow_tail {
            return;
        }
        for layer in &mut self.cursors {
            for cur in layer.iter_mut() {
                if cur.active && cur.note == note {
                    cur.active = false;
                }
            }
        }
    }

    pub fn all_off(&mut self) {
        for layer in &mut self.cursors {
            for cur in layer.iter_mut() {
                cur.active = false;
            }
        }
    }

    pub fn active_cursors(&self) -> usize {
        self.cursors.iter().flatten().filter(|c| c.active).count()
    }

    /// Additive mix into an interleaved buffer. Gains are per layer for this
    /// block; a zero gain still advances cursors so time keeps passing.
    pub fn render(&mut self, out: &mut [f32], channels: usize, gains: [f32; NUM_LAYERS]) {
        if self.target_rate <= 0.0 || channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        let Self { layers, cursors, target_rate, .. } = self;
        for l in 0..NUM_LAYERS {
            let layer = &layers[l];
            let gain = gains[l];
            for cur in cursors[l].iter_mut() {
                if !cur.active {
                    continue;
                }
                if gain <= 0.0 {
                    cur.pos += frames;
                    if cur.pos >= cur.end {
                        cur.active = false;
                    }
                    continue;
                }
                let amp = gain * cur.velocity;
                for frame in out.chunks_mut(channels) {
                    for (ch, slot) in frame.iter_mut().enumerate() {
                        *slot += layer.sample_at(cur.note, cur.pos, ch, *target_rate) * amp;
                    }
                    cur.pos += 1;
                    if cur.pos >= cur.end {
                        cur.active = false;
                        break;
                    }
                }
            }
        }
    }
}

impl Default for LayerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(frames: usize, channels: usize, rate: f32) -> Arc<SampleBuffer> {
        // channel 0 carries the frame index, channel 1 its negation
        let mut data = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for ch in 0..channels {
                let v = i as f32;
                data.push(if ch == 0 { v } else { -v });
            }
        }
        Arc::new(SampleBuffer::new(data, channels, rate))
    }

    #[test]
    fn unmapped_note_is_exact_silence() {
        let layer = SampleLayer::new();
        for idx in 0..1000 {
            assert_eq!(layer.sample_at(64, idx, 0, 44100.0), 0.0);
        }
        assert_eq!(layer.sample_at(200, 0, 0, 44100.0), 0.0);
        assert_eq!(layer.length_in_samples(200, 44100.0), 0);
        assert!(!layer.has_note(200));
    }

    #[test]
    fn native_rate_playback_is_identity() {
        let mut layer = SampleLayer::new();
        layer.set_note(60, Some(ramp_buffer(8, 1, 44100.0)));
        for i in 0..8 {
            assert_eq!(layer.sample_at(60, i, 0, 44100.0), i as f32);
        }
        assert_eq!(layer.sample_at(60, 8, 0, 44100.0), 0.0);
    }

    #[test]
    fn half_rate_source_interpolates_between_frames() {
        let mut layer = SampleLayer::new();
        // Source at half the target rate: ratio 0.5, so odd indices land
        // exactly between frames of the ramp.
        layer.set_note(60, Some(ramp_buffer(8, 1, 22050.0)));
        assert_eq!(layer.sample_at(60, 0, 0, 44100.0), 0.0);
        assert_eq!(layer.sample_at(60, 1, 0, 44100.0), 0.5);
        assert_eq!(layer.sample_at(60, 2, 0, 44100.0), 1.0);
        assert_eq!(layer.sample_at(60, 3, 0, 44100.0), 1.5);
    }

    #[test]
    fn zero_pads_past_the_end() {
        let mut layer = SampleLayer::new();
        layer.set_note(60, Some(ramp_buffer(4, 1, 22050.0)));
        // index 7 -> source pos 3.5: interpolates toward the zero pad
        assert_eq!(layer.sample_at(60, 7, 0, 44100.0), 1.5);
        assert_eq!(layer.sample_at(60, 8, 0, 44100.0), 0.0);
    }

    #[test]
    fn channel_lookup_wraps_modulo() {
        let mut layer = SampleLayer::new();
        layer.set_note(60, Some(ramp_buffer(4, 2, 44100.0)));
        assert_eq!(layer.sample_at(60, 2, 0, 44100.0), 2.0);
        assert_eq!(layer.sample_at(60, 2, 1, 44100.0), -2.0);
        assert_eq!(layer.sample_at(60, 2, 3, 44100.0), -2.0);
    }

    #[test]
    fn length_scales_with_target_rate() {
        let mut layer = SampleLayer::new();
        layer.set_note(60, Some(ramp_buffer(100, 1, 44100.0)));
        assert_eq!(layer.length_in_samples(60, 44100.0), 100);
        assert_eq!(layer.length_in_samples(60, 88200.0), 200);
        assert_eq!(layer.length_in_samples(60, 22050.0), 50);
    }

    fn engine_with_short_sample(start_rand: f32) -> (LayerEngine, [bool; 3], [f32; 3]) {
        let mut eng = LayerEngine::new();
        eng.prepare(44100.0);
        eng.set_sample(0, 60, Some(ramp_buffer(16, 1, 44100.0))).unwrap();
        (eng, [true, false, false], [start_rand, 0.0, 0.0])
    }

    #[test]
    fn one_shot_cursor_frees_itself_at_end() {
        let (mut eng, enabled, rand) = engine_with_short_sample(0.0);
        eng.note_on(60, 1.0, enabled, rand);
        assert_eq!(eng.active_cursors(), 1);

        let mut buf = vec![0.0f32; 64];
        eng.render(&mut buf, 1, [1.0, 1.0, 1.0]);
        assert_eq!(eng.active_cursors(), 0);
        // 16 source frames then silence
        assert_eq!(buf[0], 0.0);
        assert_eq!(buf[5], 5.0);
        assert_eq!(buf[15], 15.0);
        assert!(buf[16..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn hard_note_off_kills_cursors_tail_does_not() {
        let (mut eng, enabled, rand) = engine_with_short_sample(0.0);
        eng.note_on(60, 1.0, enabled, rand);
        eng.note_off(60, true);
        assert_eq!(eng.active_cursors(), 1);
        eng.note_off(60, false);
        assert_eq!(eng.active_cursors(), 0);
    }

    #[test]
    fn disabled_layer_never_claims_a_cursor() {
        let (mut eng, _, rand) = engine_with_short_sample(0.0);
        eng.note_on(60, 1.0, [false, false, false], rand);
        assert_eq!(eng.active_cursors(), 0);
    }

    #[test]
    fn velocity_and_gain_scale_output() {
        let (mut eng, enabled, rand) = engine_with_short_sample(0.0);
        eng.note_on(60, 0.5, enabled, rand);
        let mut buf = vec![0.0f32; 8];
        eng.render(&mut buf, 1, [0.5, 0.0, 0.0]);
        assert_eq!(buf[4], 4.0 * 0.5 * 0.5);
    }

    #[test]
    fn replacing_a_sample_cuts_its_cursors() {
        let (mut eng, enabled, rand) = engine_with_short_sample(0.0);
        eng.note_on(60, 1.0, enabled, rand);
        assert_eq!(eng.active_cursors(), 1);
        let old = eng.set_sample(0, 60, None).unwrap();
        assert!(old.is_some());
        assert_eq!(eng.active_cursors(), 0);
        assert!(!eng.has_note(0, 60));
    }

    #[test]
    fn layer_index_is_validated() {
        let mut eng = LayerEngine::new();
        eng.prepare(44100.0);
        assert!(matches!(
            eng.set_sample(NUM_LAYERS, 60, None),
            Err(EngineError::LayerOutOfRange { .. })
        ));
    }

    #[test]
    fn start_rand_stays_inside_requested_window() {
        let (mut eng, enabled, _) = engine_with_short_sample(0.0);
        // 50% window over a 16-frame sample: first output must come from the
        // first 8 frames, repeatedly.
        for _ in 0..32 {
            eng.note_on(60, 1.0, enabled, [50.0, 0.0, 0.0]);
            let mut buf = vec![0.0f32; 1];
            eng.render(&mut buf, 1, [1.0, 0.0, 0.0]);
            assert!(buf[0] <= 8.0, "start position escaped the window: {}", buf[0]);
            eng.all_off();
        }
    }
}
