use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use super::{messages::EngineMsg, meter::OutputMeter, synth::Synth};

// Mono analysis chunks pushed to an optional listener thread
const TAP_CHUNK: usize = 2048;

pub struct AudioEngine {
  tx: Sender<EngineMsg>,
  rx: Receiver<EngineMsg>,
  pub sr: f32,
  synth: Option<Synth>,
  meter: Arc<OutputMeter>,
  stream: Option<cpal::Stream>,
  tap_tx: Option<Sender<Vec<f32>>>,
}

impl AudioEngine {
  pub fn new() -> Result<Self, String> {
    let (tx, rx) = unbounded();
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| "no output device".to_string())?;
    let config = pick_output_config(&device)?;
    let sr = config.sample_rate().0 as f32;

    let synth = Synth::new();
    let meter = synth.meter();
    Ok(Self {
      tx,
      rx,
      sr,
      synth: Some(synth),
      meter,
      stream: None,
      tap_tx: None,
    })
  }

  pub fn sender(&self) -> Sender<EngineMsg> { self.tx.clone() }

  pub fn meter(&self) -> Arc<OutputMeter> { self.meter.clone() }

  pub fn set_tap_sender(&mut self, tx: Sender<Vec<f32>>) { self.tap_tx = Some(tx); }

  pub fn start(&mut self) -> Result<(), String> {
    if self.stream.is_some() { return Ok(()); }
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| "no output device".to_string())?;
    let config = pick_output_config(&device)?;
    let mut cfg: cpal::StreamConfig = config.into();
    // Fixed 1024-frame buffer; OS defaults can run too small under load
    cfg.buffer_size = cpal::BufferSize::Fixed(1024);
    self.sr = cfg.sample_rate.0 as f32;
    let channels = cfg.channels as usize;

    // The synth leaves self here and lives on the audio thread from now on.
    let mut synth = self.synth.take().unwrap_or_default();
    synth.prepare(self.sr, 4096, channels).map_err(|e| e.to_string())?;
    self.meter = synth.meter();

    let rx = self.rx.clone();
    let tap_tx = self.tap_tx.clone();
    let mut tap_buf = Vec::<f32>::with_capacity(TAP_CHUNK);
    let mut running = true;

    let err_fn = |e: cpal::StreamError| log::error!("stream error: {e}");
    let stream = device.build_output_stream(&cfg, move |data: &mut [f32], _| {
      // Bounded non-blocking drain; the block must still render on time
      let mut drained = 0usize;
      loop {
        match rx.try_recv() {
          Ok(msg) => apply_msg(&mut synth, msg, &mut running),
          Err(TryRecvError::Empty) => break,
          Err(TryRecvError::Disconnected) => break,
        }
        drained += 1;
        if drained >= 24 { break; }
      }

      if !running {
        data.fill(0.0);
        return;
      }
      synth.render_block(data);

      if let Some(tx) = tap_tx.as_ref() {
        for frame in data.chunks(channels) {
          let r = if frame.len() > 1 { frame[1] } else { frame[0] };
          if tap_buf.len() < TAP_CHUNK {
            tap_buf.push(0.5 * (frame[0] + r));
          }
        }
        if tap_buf.len() >= TAP_CHUNK {
          // try_send a copy; a slow listener loses chunks, never blocks audio
          let mut out = Vec::with_capacity(TAP_CHUNK);
          out.extend_from_slice(&tap_buf[0..TAP_CHUNK]);
          let _ = tx.try_send(out);
          tap_buf.clear();
        }
      }
    }, err_fn, None).map_err(|e| e.to_string())?;
    stream.play().map_err(|e| e.to_string())?;
    self.stream = Some(stream);
    Ok(())
  }

  pub fn stop(&mut self) {
    self.stream.take();
  }
}

/// 44.1 kHz stereo f32 first, then 48 kHz, then any stereo f32 the device
/// offers, then whatever the OS calls default.
fn pick_output_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, String> {
  let mut chosen: Option<cpal::SupportedStreamConfig> = None;
  if let Ok(supported) = device.supported_output_configs() {
    for cfg_range in supported {
      if cfg_range.channels() != 2 { continue; }
      if cfg_range.sample_format() != cpal::SampleFormat::F32 { continue; }
      let sr = 44_100u32;
      if cfg_range.min_sample_rate().0 <= sr && cfg_range.max_sample_rate().0 >= sr {
        chosen = Some(cfg_range.with_sample_rate(cpal::SampleRate(sr)));
        break;
      }
    }
  }
  if chosen.is_none() {
    if let Ok(supported) = device.supported_output_configs() {
      for cfg_range in supported {
        if cfg_range.channels() != 2 { continue; }
        if cfg_range.sample_format() != cpal::SampleFormat::F32 { continue; }
        let sr = 48_000u32;
        if cfg_range.min_sample_rate().0 <= sr && cfg_range.max_sample_rate().0 >= sr {
          chosen = Some(cfg_range.with_sample_rate(cpal::SampleRate(sr)));
          break;
        }
      }
    }
  }
  if chosen.is_none() {
    if let Ok(supported) = device.supported_output_configs() {
      for cfg_range in supported {
        if cfg_range.channels() == 2 && cfg_range.sample_format() == cpal::SampleFormat::F32 {
          chosen = Some(cfg_range.with_max_sample_rate());
          break;
        }
      }
    }
  }
  match chosen {
    Some(cfg) => Ok(cfg),
    None => device.default_output_config().map_err(|e| e.to_string()),
  }
}

fn apply_msg(synth: &mut Synth, msg: EngineMsg, running: &mut bool) {
  // Control errors have no return path on the audio thread and must not log
  // from it either; bad ids and indices are dropped.
  match msg {
    EngineMsg::SetParam { path, value } => { let _ = synth.set_param(&path, value); }
    EngineMsg::NoteOn { note, vel } => synth.note_on(note, vel),
    EngineMsg::NoteOff { note, allow_tail } => synth.note_off(note, allow_tail),
    EngineMsg::ApplyPreset { index } => { let _ = synth.apply_preset(index); }
    EngineMsg::LoadLayerSample { layer, note, buffer } => {
      // The replaced buffer, if any, drops on this thread.
      let _ = synth.set_layer_sample(layer, note, Some(buffer));
    }
    EngineMsg::ClearLayerSample { layer, note } => {
      let _ = synth.set_layer_sample(layer, note, None);
    }
    EngineMsg::AllNotesOff => synth.all_notes_off(),
    EngineMsg::Quit => { *running = false; }
  }
}

// Not Clone on purpose: the synth is single-owner and moves into the stream.
