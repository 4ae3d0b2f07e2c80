use crate::error::SpeechError;
use crate::matcher::normalize;
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, SystemTime};

/// One voice turn as delivered by the recognizer
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Normalized utterance
    pub text: String,
    pub confidence: f64,
    pub timestamp: Option<SystemTime>,
}

impl RecognitionResult {
    pub fn new(raw: &str, confidence: f64) -> Self {
        Self {
            text: normalize(raw),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Some(SystemTime::now()),
        }
    }
}

/// Producer of recognized utterances
pub trait SpeechSource {
    /// Blocks for the next utterance. With `wait` set, returns `Ok(None)`
    /// once that much time passes without one.
    fn next_utterance(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<RecognitionResult>, SpeechError>;
}

/// Typed utterances from stdin, one per line
pub struct ConsoleSource {
    lines: Receiver<String>,
}

impl ConsoleSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        // stdin reads block, so they live on their own thread
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("stdin: {e}");
                        break;
                    }
                }
            }
        });
        Self { lines: rx }
    }
}

impl Default for ConsoleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSource for ConsoleSource {
    fn next_utterance(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<RecognitionResult>, SpeechError> {
        let line = match wait {
            None => self.lines.recv().map_err(|_| SpeechError::Closed)?,
            Some(wait) => match self.lines.recv_timeout(wait) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(SpeechError::Closed),
            },
        };
        Ok(Some(RecognitionResult::new(&line, 1.0)))
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Say(RecognitionResult),
    /// Nothing is heard; sleeps through the caller's wait bound
    Silence,
    Fail(String),
}

/// Replays a fixed script, then reports the source closed
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<Scripted>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Every line spoken with full confidence
    pub fn from_lines(lines: &[&str]) -> Self {
        Self::new(
            lines
                .iter()
                .map(|line| Scripted::Say(RecognitionResult::new(line, 1.0))),
        )
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SpeechSource for ScriptedSource {
    fn next_utterance(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<RecognitionResult>, SpeechError> {
        match self.script.pop_front() {
            Some(Scripted::Say(result)) => Ok(Some(result)),
            Some(Scripted::Silence) => {
                if let Some(wait) = wait {
                    std::thread::sleep(wait);
                }
                Ok(None)
            }
            Some(Scripted::Fail(detail)) => Err(SpeechError::Recognition(detail)),
            None => Err(SpeechError::Closed),
        }
    }
}
