// Sample file decoding - symphonia front end for the layer engine
//
// Strictly a non-realtime path: callers decode here, then hand the finished
// buffer to the engine over the message channel.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as PcmBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::engine::error::EngineError;
use crate::engine::layers::SampleBuffer;

/// Decodes a WAV/FLAC/MP3/AIFF file into an interleaved buffer at its native
/// rate and channel count. The layer engine does the rate shifting later.
pub fn load_file(path: &str) -> Result<SampleBuffer, EngineError> {
    let file = File::open(path).map_err(|e| EngineError::Decode(format!("{path}: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::Decode(format!("{path}: no supported audio track")))?;
    let track_id = track.id;

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let mut data: Vec<f32> = Vec::new();
    let mut channels = 0usize;
    let mut sample_rate = 0.0f32;
    let mut pcm: Option<PcmBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Track list changed, or the reader hit end of stream;
            // either way the frames gathered so far are the sample.
            Err(Error::ResetRequired) => break,
            Err(Error::IoError(_)) => break,
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        while !format.metadata().is_latest() {
            format.metadata().pop();
        }

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        if pcm.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count();
            sample_rate = spec.rate as f32;
            pcm = Some(PcmBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = &mut pcm {
            buf.copy_interleaved_ref(decoded);
            data.extend_from_slice(buf.samples());
        }
    }

    if data.is_empty() || channels == 0 || sample_rate <= 0.0 {
        return Err(EngineError::Decode(format!("{path}: no audio frames")));
    }
    Ok(SampleBuffer::new(data, channels, sample_rate))
}

/// Scales the buffer so its loudest sample sits at 0.9. Quiet material that
/// would need more than a 1.5x boost is left untouched.
pub fn peak_normalize(buf: &mut SampleBuffer) {
    let mut peak = 0.0f32;
    for &s in &buf.data {
        let a = s.abs();
        if a > peak {
            peak = a;
        }
    }
    if peak > 0.0001 {
        let norm = 0.9 / peak;
        if norm < 1.5 {
            for s in &mut buf.data {
                *s *= norm;
            }
        }
    }
}
