// Demo host - plays a short riff live when an output device exists,
// otherwise bounces the same riff offline to a wav. Either way a coarse
// spectrum readout of the rendered audio is logged.

use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::{unbounded as chan, Receiver};

use sawstack::{loader, AudioEngine, EngineMsg, OutputMeter, SampleBuffer, Synth};

// A minor walk-down, one chord per bar: Am, G, F, E. The chord roots double
// as the note slots an optional sample file (argv[1]) is mapped onto.
const RIFF: [&[u8]; 4] = [&[57, 60, 64], &[55, 59, 62], &[53, 57, 60], &[52, 56, 59]];

const HOLD_MS: u64 = 700;
const GAP_MS: u64 = 200;
const TAIL_MS: u64 = 1800;

const SR: f32 = 44100.0;
const BLOCK: usize = 512;
const CAPTURE: usize = 4096;

fn main() -> anyhow::Result<()> {
  env_logger::builder()
    .filter_level(log::LevelFilter::Info)
    .init();

  if let Err(e) = run_live() {
    log::warn!("live output unavailable ({e}); bouncing the riff to a wav instead");
    bounce_offline()?;
  }
  Ok(())
}

fn run_live() -> Result<(), String> {
  let mut engine = AudioEngine::new()?;
  let (stx, srx) = chan::<Vec<f32>>();
  engine.set_tap_sender(stx);
  let tx = engine.sender();
  engine.start()?;
  spawn_spectrum_logger(srx, engine.sr, engine.meter());
  log::info!("live at {} Hz; playing the demo riff", engine.sr);

  let _ = tx.send(EngineMsg::ApplyPreset { index: 1 });
  let _ = tx.send(EngineMsg::SetParam { path: "master/gain_db".into(), value: -6.0 });
  if let Some(buf) = sample_from_args() {
    let _ = tx.send(EngineMsg::SetParam { path: "layer1/enabled".into(), value: 1.0 });
    for chord in RIFF {
      let _ = tx.send(EngineMsg::LoadLayerSample { layer: 0, note: chord[0], buffer: buf.clone() });
    }
  }

  for chord in RIFF {
    for &n in chord {
      let _ = tx.send(EngineMsg::NoteOn { note: n, vel: 0.9 });
    }
    thread::sleep(Duration::from_millis(HOLD_MS));
    for &n in chord {
      let _ = tx.send(EngineMsg::NoteOff { note: n, allow_tail: true });
    }
    thread::sleep(Duration::from_millis(GAP_MS));
  }
  let _ = tx.send(EngineMsg::AllNotesOff);
  thread::sleep(Duration::from_millis(TAIL_MS));

  let _ = tx.send(EngineMsg::Quit);
  thread::sleep(Duration::from_millis(100));
  engine.stop();
  Ok(())
}

// Logs the dominant bin of the mono tap a few lines per second, alongside
// the meter the callback publishes.
fn spawn_spectrum_logger(rx: Receiver<Vec<f32>>, sr: f32, meter: Arc<OutputMeter>) {
  thread::spawn(move || {
    let mut since = 0usize;
    while let Ok(buf) = rx.recv() {
      since += 1;
      if since < 8 {
        continue;
      }
      since = 0;
      if let Some((freq, mag)) = dominant_peak(&buf, sr) {
        let (pl, pr) = meter.peaks();
        log::info!(
          "peak {freq:>5.0} Hz (mag {mag:.4})  out L {pl:.2} R {pr:.2}  voices {}",
          meter.active_voices()
        );
      }
    }
  });
}

// Strongest bin in [20..20000] Hz. Hann window, zero-pad to a power of two.
fn dominant_peak(buf: &[f32], sr: f32) -> Option<(f32, f32)> {
  let n = buf.len();
  if n < 64 || sr <= 0.0 {
    return None;
  }
  let pow2 = n.next_power_of_two();
  let mut spec: Vec<rustfft::num_complex::Complex32> =
    buf.iter().map(|&x| rustfft::num_complex::Complex32::new(x, 0.0)).collect();
  spec.resize(pow2, rustfft::num_complex::Complex32::new(0.0, 0.0));
  let n_win = n.max(2);
  for i in 0..n {
    let w = 0.5 * (1.0 - (std::f32::consts::TAU * (i as f32) / ((n_win - 1) as f32)).cos());
    spec[i].re *= w;
  }
  let mut planner = rustfft::FftPlanner::<f32>::new();
  let fft = planner.plan_fft_forward(pow2);
  fft.process(&mut spec);

  let half = pow2 / 2;
  let lo = (((20.0 / sr) * pow2 as f32).round() as usize).clamp(1, half - 1);
  let hi = (((20000.0 / sr) * pow2 as f32).round() as usize).clamp(lo, half - 1);
  let mut best_k = lo;
  let mut best_m = 0.0f32;
  for k in lo..=hi {
    let c = spec[k];
    let m = (c.re * c.re + c.im * c.im).sqrt() / pow2 as f32;
    if m > best_m {
      best_m = m;
      best_k = k;
    }
  }
  Some((best_k as f32 * sr / pow2 as f32, best_m))
}

// Optional argv[1]: decode a sample file for the layer demo.
fn sample_from_args() -> Option<Arc<SampleBuffer>> {
  let path = std::env::args().nth(1)?;
  match loader::load_file(&path) {
    Ok(mut buf) => {
      loader::peak_normalize(&mut buf);
      log::info!(
        "layer sample {path}: {} frames, {} ch, {} Hz",
        buf.frames(),
        buf.channels,
        buf.sample_rate
      );
      Some(Arc::new(buf))
    }
    Err(e) => {
      log::warn!("skipping layer sample {path}: {e}");
      None
    }
  }
}

fn bounce_offline() -> anyhow::Result<()> {
  let path = "sawstack-demo.wav";
  let mut synth = Synth::new();
  synth.prepare(SR, BLOCK, 2)?;
  synth.apply_preset(1)?;
  synth.set_param("master/gain_db", -6.0)?;
  if let Some(buf) = sample_from_args() {
    synth.set_param("layer1/enabled", 1.0)?;
    for chord in RIFF {
      synth.set_layer_sample(0, chord[0], Some(buf.clone()))?;
    }
  }

  let spec = hound::WavSpec {
    channels: 2,
    sample_rate: SR as u32,
    bits_per_sample: 16,
    sample_format: hound::SampleFormat::Int,
  };
  let mut writer = hound::WavWriter::create(path, spec)?;

  let mut peak = 0.0f32;
  let mut capture = Vec::with_capacity(CAPTURE);
  for chord in RIFF {
    for &n in chord {
      synth.note_on(n, 0.9);
    }
    peak = peak.max(render_ms(&mut synth, &mut writer, HOLD_MS, &mut capture)?);
    for &n in chord {
      synth.note_off(n, true);
    }
    peak = peak.max(render_ms(&mut synth, &mut writer, GAP_MS, &mut capture)?);
  }
  peak = peak.max(render_ms(&mut synth, &mut writer, TAIL_MS, &mut capture)?);
  writer.finalize()?;

  let patch_path = "sawstack-demo.patch.json";
  std::fs::write(patch_path, serde_json::to_vec_pretty(&synth.snapshot())?)?;
  log::info!("wrote the patch next to the bounce: {patch_path}");

  let secs = (RIFF.len() as u64 * (HOLD_MS + GAP_MS) + TAIL_MS) as f32 / 1000.0;
  if let Some((freq, mag)) = dominant_peak(&capture, SR) {
    log::info!("opening spectrum: peak {freq:.0} Hz (mag {mag:.4})");
  }
  log::info!("bounced {secs:.1}s to {path} (peak {peak:.2})");
  Ok(())
}

// Renders `ms` of audio into the writer. Returns the absolute peak over the
// span and feeds the first CAPTURE mono samples into `capture` for the
// spectrum log.
fn render_ms(
  synth: &mut Synth,
  writer: &mut hound::WavWriter<std::io::BufWriter<std::fs::File>>,
  ms: u64,
  capture: &mut Vec<f32>,
) -> anyhow::Result<f32> {
  let mut frames = ((ms as f32) * SR / 1000.0) as usize;
  let mut block = vec![0.0f32; BLOCK * 2];
  let mut peak = 0.0f32;
  while frames > 0 {
    let n = BLOCK.min(frames);
    let out = &mut block[0..n * 2];
    synth.render_block(out);
    for frame in out.chunks(2) {
      if capture.len() < CAPTURE {
        capture.push(0.5 * (frame[0] + frame[1]));
      }
      peak = peak.max(frame[0].abs()).max(frame[1].abs());
      for &s in frame {
        let clamped = s.max(-1.0).min(1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
      }
    }
    frames -= n;
  }
  Ok(peak)
}
