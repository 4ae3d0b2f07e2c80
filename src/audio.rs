//! Microphone capture: cpal stream → VAD segments → WAV → recognition server.

use crate::asr;
use crate::config::{SpeechConfig, VadConfig};
use crate::error::SpeechError;
use crate::speech::{RecognitionResult, SpeechSource};
use crate::vad::VoiceActivityDetector;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Utterances spoken into the default input device
pub struct MicrophoneSource {
    segments: Receiver<Vec<f32>>,
    sample_rate: u32,
    server_url: String,
    asr_config_id: String,
    runtime: tokio::runtime::Runtime,
    /// Dropping this ends the capture thread
    _stop: Sender<()>,
}

impl MicrophoneSource {
    /// Opens the default microphone and starts segmenting.
    pub fn open(speech: &SpeechConfig, vad: &VadConfig) -> Result<Self, SpeechError> {
        let (segment_tx, segment_rx) = mpsc::channel::<Vec<f32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, SpeechError>>(1);
        let vad = vad.clone();

        // cpal::Stream is not Send, so the stream lives and dies on this thread
        std::thread::spawn(move || {
            let stream = match build_stream(&vad, segment_tx) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until the source is dropped
            let _ = stop_rx.recv();
            drop(stream);
            log::info!("audio thread exiting");
        });

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| SpeechError::Device("audio thread died during setup".to_string()))??;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SpeechError::Device(format!("runtime: {e}")))?;

        log::info!("microphone open at {sample_rate} Hz");
        Ok(Self {
            segments: segment_rx,
            sample_rate,
            server_url: speech.server_url.clone(),
            asr_config_id: speech.asr_config_id.clone(),
            runtime,
            _stop: stop_tx,
        })
    }

    fn transcribe(&self, samples: Vec<f32>) -> Result<Option<RecognitionResult>, SpeechError> {
        let wav = encode_wav(&samples, self.sample_rate)?;
        let transcript = self.runtime.block_on(asr::recognize(
            &self.server_url,
            &self.asr_config_id,
            wav,
        ))?;
        let result = RecognitionResult::new(&transcript.text, transcript.confidence);
        if result.text.is_empty() {
            log::debug!("empty transcript");
            return Ok(None);
        }
        Ok(Some(result))
    }
}

impl SpeechSource for MicrophoneSource {
    fn next_utterance(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<RecognitionResult>, SpeechError> {
        let samples = match wait {
            None => self.segments.recv().map_err(|_| SpeechError::Closed)?,
            Some(wait) => match self.segments.recv_timeout(wait) {
                Ok(samples) => samples,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(SpeechError::Closed),
            },
        };
        self.transcribe(samples)
    }
}

fn build_stream(
    vad: &VadConfig,
    segments: Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), SpeechError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SpeechError::Device("no microphone found".to_string()))?;

    let supported_config = device
        .default_input_config()
        .map_err(|e| SpeechError::Device(format!("input config: {e}")))?;

    let sample_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels();
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut detector = VoiceActivityDetector::new(vad);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = if channels > 1 {
                    data.chunks(channels as usize)
                        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
                        .collect()
                } else {
                    data.to_vec()
                };
                if let Some(segment) = detector.process_frame(&mono, Instant::now()) {
                    // Receiver gone means the session is shutting down
                    let _ = segments.send(segment);
                }
            },
            |err| {
                log::error!("audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| SpeechError::Device(format!("build stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SpeechError::Device(format!("start stream: {e}")))?;

    Ok((stream, sample_rate))
}

/// Encodes mono f32 PCM as 16-bit WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SpeechError> {
    if samples.is_empty() {
        return Err(SpeechError::Recognition("empty recording".to_string()));
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| SpeechError::Recognition(format!("wav encoding: {e}"));

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for &sample in samples {
            // f32 [-1.0, 1.0] → i16
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_is_mono_16_bit_and_clipped() {
        let bytes = encode_wav(&[0.0, 0.5, 2.0, -2.0], 16000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, 32767, -32768]);
    }

    #[test]
    fn empty_recording_is_rejected() {
        assert!(matches!(
            encode_wav(&[], 16000),
            Err(SpeechError::Recognition(_))
        ));
    }
}
