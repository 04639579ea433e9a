// Audio decoder using Symphonia
// Turns a base64 speech payload into a mono buffer at the target rate

use std::io::Cursor;

use base64::Engine;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::{AudioBufferRef, AudioPlanes, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

use crate::audio::buffer::SampleBuffer;
use crate::error::PlayerError;

/// Decode a base64-encoded compressed-audio payload into a mono buffer
/// resampled to `target_rate`. The payload may carry a `data:` URL
/// prefix and embedded whitespace; the encoded format is whatever the
/// probe recognizes (mp3, wav, ogg, flac, aac, ...).
pub fn decode_base64_payload(payload: &str, target_rate: u32) -> Result<SampleBuffer, PlayerError> {
    let encoded = strip_data_url(payload);
    let cleaned: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| PlayerError::Decode {
            reason: format!("invalid base64 payload: {}", e),
        })?;

    decode_bytes(bytes, target_rate)
}

/// Decode raw encoded-audio bytes into a mono buffer at `target_rate`.
pub fn decode_bytes(bytes: Vec<u8>, target_rate: u32) -> Result<SampleBuffer, PlayerError> {
    let byte_count = bytes.len();
    let mut decoder = PayloadDecoder::open(bytes)?;
    let source_rate = decoder.sample_rate();

    let mut mono: Vec<f32> = Vec::new();
    while let Some(chunk) = decoder.decode_next()? {
        mono.extend_from_slice(&chunk);
    }

    if mono.is_empty() {
        return Err(PlayerError::Decode {
            reason: "payload decoded to no audio frames".to_string(),
        });
    }

    log::info!(
        "[Decode] {} bytes -> {} frames at {} Hz ({} channel(s))",
        byte_count,
        mono.len(),
        source_rate,
        decoder.channels()
    );

    let samples = if source_rate != target_rate {
        resample_mono(&mono, source_rate, target_rate)?
    } else {
        mono
    };

    Ok(SampleBuffer::new(samples, target_rate))
}

/// Cut an optional `data:audio/...;base64,` prefix off the payload.
fn strip_data_url(payload: &str) -> &str {
    if let Some(rest) = payload.strip_prefix("data:") {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => payload,
        }
    } else {
        payload
    }
}

/// Streaming decoder over an in-memory payload.
struct PayloadDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl PayloadDecoder {
    fn open(bytes: Vec<u8>) -> Result<Self, PlayerError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        // No filename, so no extension hint; the probe sniffs the format.
        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::Decode {
                reason: format!("unrecognized audio format: {}", e),
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::Decode {
                reason: "no audio track in payload".to_string(),
            })?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::Decode {
                reason: format!("no decoder for codec: {}", e),
            })?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    /// Decode the next packet to mono samples.
    /// Returns None at end of stream.
    fn decode_next(&mut self) -> Result<Option<Vec<f32>>, PlayerError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None); // End of stream
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(PlayerError::Decode {
                        reason: format!("failed to read packet: {}", e),
                    })
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(audio_buf_to_mono(&decoded))),
                Err(SymphoniaError::DecodeError(e)) => {
                    // Recoverable corruption; skip the packet
                    log::warn!("[Decode] skipping bad packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(PlayerError::Decode {
                        reason: format!("decode failed: {}", e),
                    })
                }
            }
        }
    }
}

/// Convert any AudioBufferRef to mono f32, averaging the channels.
fn audio_buf_to_mono(buf: &AudioBufferRef) -> Vec<f32> {
    match buf {
        AudioBufferRef::F32(b) => mono_convert(b.planes(), b.frames(), |s: f32| s),
        AudioBufferRef::F64(b) => mono_convert(b.planes(), b.frames(), |s: f64| s as f32),
        AudioBufferRef::S8(b) => mono_convert(b.planes(), b.frames(), |s: i8| s as f32 / 128.0),
        AudioBufferRef::S16(b) => {
            mono_convert(b.planes(), b.frames(), |s: i16| s as f32 / 32768.0)
        }
        AudioBufferRef::S24(b) => {
            mono_convert(b.planes(), b.frames(), |s| s.inner() as f32 / 8388608.0)
        }
        AudioBufferRef::S32(b) => mono_convert(b.planes(), b.frames(), |s: i32| {
            (s as f64 / 2147483648.0) as f32
        }),
        AudioBufferRef::U8(b) => {
            mono_convert(b.planes(), b.frames(), |s: u8| (s as f32 - 128.0) / 128.0)
        }
        AudioBufferRef::U16(b) => mono_convert(b.planes(), b.frames(), |s: u16| {
            (s as f32 - 32768.0) / 32768.0
        }),
        AudioBufferRef::U24(b) => mono_convert(b.planes(), b.frames(), |s| {
            (s.inner() as f32 - 8388608.0) / 8388608.0
        }),
        AudioBufferRef::U32(b) => mono_convert(b.planes(), b.frames(), |s: u32| {
            ((s as f64 - 2147483648.0) / 2147483648.0) as f32
        }),
    }
}

fn mono_convert<T: Sample + Copy, F: Fn(T) -> f32>(
    planes: AudioPlanes<T>,
    frames: usize,
    convert: F,
) -> Vec<f32> {
    let chans = planes.planes();
    let num_channels = chans.len();
    if num_channels == 0 || frames == 0 {
        return vec![];
    }

    let gain = 1.0 / num_channels as f32;
    let mut mono = Vec::with_capacity(frames);

    for frame in 0..frames {
        let mut acc = 0.0f32;
        for ch in chans {
            acc += convert(ch[frame]);
        }
        mono.push(acc * gain);
    }

    mono
}

/// Resample a mono signal with a windowed-sinc resampler.
fn resample_mono(samples: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>, PlayerError> {
    const CHUNK: usize = 1024;

    let ratio = dst_rate as f64 / src_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK, 1).map_err(|e| {
        PlayerError::Decode {
            reason: format!("resampler setup failed: {}", e),
        }
    })?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + CHUNK);

    let mut pos = 0;
    while pos + CHUNK <= samples.len() {
        let chunks = resampler
            .process(&[&samples[pos..pos + CHUNK]], None)
            .map_err(|e| PlayerError::Decode {
                reason: format!("resampling failed: {}", e),
            })?;
        output.extend_from_slice(&chunks[0]);
        pos += CHUNK;
    }

    if pos < samples.len() {
        let chunks = resampler
            .process_partial(Some(&[&samples[pos..]]), None)
            .map_err(|e| PlayerError::Decode {
                reason: format!("resampling failed: {}", e),
            })?;
        output.extend_from_slice(&chunks[0]);
    }

    // Flush the resampler's internal delay line
    let chunks = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|e| PlayerError::Decode {
            reason: format!("resampling failed: {}", e),
        })?;
    output.extend_from_slice(&chunks[0]);

    // Drop the group delay from the front and trim the zero tail
    output.drain(..delay.min(output.len()));
    if output.len() > expected {
        output.truncate(expected);
    }

    log::debug!(
        "[Decode] resampled {} Hz -> {} Hz ({} -> {} frames)",
        src_rate,
        dst_rate,
        samples.len(),
        output.len()
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn wav_base64(samples: &[i16], sample_rate: u32, channels: u16) -> String {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
    }

    #[test]
    fn test_decode_mono_wav_at_target_rate() {
        let samples = vec![0i16; 12000];
        let payload = wav_base64(&samples, 24000, 1);
        let buffer = decode_base64_payload(&payload, 24000).unwrap();
        assert_eq!(buffer.sample_rate(), 24000);
        assert_eq!(buffer.len_frames(), 12000);
        assert!((buffer.duration_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        // L = R = 8192 (0.25 full scale); the average must match
        let mut samples = Vec::new();
        for _ in 0..1000 {
            samples.push(8192i16);
            samples.push(8192i16);
        }
        let payload = wav_base64(&samples, 24000, 2);
        let buffer = decode_base64_payload(&payload, 24000).unwrap();
        assert_eq!(buffer.len_frames(), 1000);
        assert!((buffer.samples()[500] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_decode_resamples_to_target_rate() {
        let samples = vec![0i16; 48000];
        let payload = wav_base64(&samples, 48000, 1);
        let buffer = decode_base64_payload(&payload, 24000).unwrap();
        assert_eq!(buffer.sample_rate(), 24000);
        // one second of audio, within a few frames of exact
        let drift = buffer.len_frames() as i64 - 24000;
        assert!(drift.abs() <= 64, "resampled length off by {}", drift);
        assert!(buffer.samples().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_decode_tolerates_data_url_prefix() {
        let samples = vec![0i16; 2400];
        let payload = format!("data:audio/wav;base64,{}", wav_base64(&samples, 24000, 1));
        let buffer = decode_base64_payload(&payload, 24000).unwrap();
        assert_eq!(buffer.len_frames(), 2400);
    }

    #[test]
    fn test_decode_tolerates_embedded_whitespace() {
        let samples = vec![0i16; 2400];
        let raw = wav_base64(&samples, 24000, 1);
        let wrapped: String = raw
            .as_bytes()
            .chunks(60)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let buffer = decode_base64_payload(&wrapped, 24000).unwrap();
        assert_eq!(buffer.len_frames(), 2400);
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let err = decode_base64_payload("!!! not base64 !!!", 24000).unwrap_err();
        match err {
            PlayerError::Decode { reason } => assert!(!reason.is_empty()),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_bytes_are_decode_error() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0u8; 256]);
        let err = decode_base64_payload(&payload, 24000).unwrap_err();
        assert!(matches!(err, PlayerError::Decode { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_empty_payload_is_decode_error() {
        let err = decode_base64_payload("", 24000).unwrap_err();
        assert!(matches!(err, PlayerError::Decode { .. }));
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:audio/mp3;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }
}
