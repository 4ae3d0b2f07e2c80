use crate::config::VadConfig;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadState {
    /// Waiting for speech
    Idle,
    /// Speech detected, buffering
    Speaking,
}

/// Energy-based segmentation of the microphone stream into utterances
pub struct VoiceActivityDetector {
    pub state: VadState,
    speech_threshold: f32,
    silence_timeout_ms: u64,
    min_speech_duration_ms: u64,
    speech_start: Option<Instant>,
    last_speech_time: Option<Instant>,
    buffer: Vec<f32>,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            state: VadState::Idle,
            speech_threshold: config.speech_threshold,
            silence_timeout_ms: config.silence_timeout_ms,
            min_speech_duration_ms: config.min_speech_duration_ms,
            speech_start: None,
            last_speech_time: None,
            buffer: Vec::new(),
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    /// Feeds one mono frame. Returns a finished utterance once speech is
    /// followed by enough silence; the detector is then idle again.
    pub fn process_frame(&mut self, samples: &[f32], now: Instant) -> Option<Vec<f32>> {
        let is_speech = Self::rms(samples) > self.speech_threshold;

        match self.state {
            VadState::Idle => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.speech_start = Some(now);
                    self.last_speech_time = Some(now);
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    log::debug!("vad: speech started");
                }
                None
            }
            VadState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.last_speech_time = Some(now);
                    return None;
                }
                let last = self.last_speech_time?;
                let silence = now.duration_since(last).as_millis() as u64;
                if silence < self.silence_timeout_ms {
                    return None;
                }
                let duration = self
                    .speech_start
                    .map(|start| now.duration_since(start).as_millis() as u64)
                    .unwrap_or_default();
                if duration >= self.min_speech_duration_ms {
                    log::debug!("vad: segment of {duration}ms");
                    let data = std::mem::take(&mut self.buffer);
                    self.reset();
                    Some(data)
                } else {
                    log::debug!("vad: {duration}ms segment too short, dropped");
                    self.reset();
                    None
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.speech_start = None;
        self.last_speech_time = None;
        self.buffer.clear();
    }
}
