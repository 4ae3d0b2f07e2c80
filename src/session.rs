//! Session loop: speech source → matcher → gates → dispatcher → feedback.

use crate::confidence::{evaluate, GateConfig, GateDecision};
use crate::config::Settings;
use crate::confirmation::{
    classify_reply, Admission, CancelReason, ClearedCommand, ConfirmationGate, ConfirmationState,
    Reply, ReplyOutcome,
};
use crate::dispatcher::{Dispatcher, Handlers};
use crate::error::{DispatchError, SpeechError};
use crate::feedback::{Feedback, FeedbackEvent};
use crate::matcher::{normalize, MatchWeights, Matcher};
use crate::registry::Registry;
use crate::speech::{RecognitionResult, SpeechSource};
use std::sync::Arc;
use std::time::Instant;

/// Session-level phrases, stored normalized
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub wake_word_enabled: bool,
    pub wake_word: String,
    pub exit_phrases: Vec<String>,
    pub cancel_phrases: Vec<String>,
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            wake_word_enabled: settings.wake_word_enabled,
            wake_word: normalize(&settings.wake_word),
            exit_phrases: normalize_all(&settings.exit_phrases),
            cancel_phrases: normalize_all(&settings.cancel_phrases),
        }
    }
}

fn normalize_all(phrases: &[String]) -> Vec<String> {
    phrases.iter().map(|p| normalize(p)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Continue,
    Exit,
}

pub struct Session<S, F> {
    registry: Arc<Registry>,
    matcher: Matcher,
    gate: GateConfig,
    confirmation: ConfirmationGate,
    state: ConfirmationState,
    dispatcher: Dispatcher,
    source: S,
    feedback: F,
    options: SessionOptions,
    /// Wake word heard on its own; the next utterance is a command
    armed: bool,
}

impl<S: SpeechSource, F: Feedback> Session<S, F> {
    pub fn new(
        settings: &Settings,
        registry: Arc<Registry>,
        handlers: Handlers,
        source: S,
        feedback: F,
    ) -> Self {
        Self {
            registry,
            matcher: Matcher::new(MatchWeights {
                literal: settings.literal_weight,
                slot: settings.slot_weight,
            }),
            gate: GateConfig::from(settings),
            confirmation: ConfirmationGate::new(settings.confirmation_timeout()),
            state: ConfirmationState::Idle,
            dispatcher: Dispatcher::new(handlers),
            source,
            feedback,
            options: SessionOptions::from(settings),
            armed: false,
        }
    }

    pub fn feedback(&self) -> &F {
        &self.feedback
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn confirmation_state(&self) -> &ConfirmationState {
        &self.state
    }

    /// Processes turns until an exit phrase or the source closes.
    pub fn run(&mut self) {
        log::info!(
            "session started ({} commands, wake word {})",
            self.registry.lookup_all().len(),
            if self.options.wake_word_enabled {
                self.options.wake_word.as_str()
            } else {
                "off"
            }
        );
        self.feedback.notify(&FeedbackEvent::Ready);
        while self.step() == Turn::Continue {}
        log::info!("session ended");
    }

    /// Pulls one utterance, bounded by the pending confirmation's deadline.
    pub fn step(&mut self) -> Turn {
        let wait = self.confirmation.remaining(&self.state, Instant::now());
        let next = self.source.next_utterance(wait);
        let now = Instant::now();
        self.tick(now);
        match next {
            Ok(Some(result)) => self.handle(result, now),
            Ok(None) => Turn::Continue,
            Err(SpeechError::Closed) => {
                log::info!("speech source closed");
                self.withdraw_pending();
                Turn::Exit
            }
            Err(e) => {
                log::error!("speech input failed: {e}");
                self.feedback
                    .notify(&FeedbackEvent::SpeechFailed(e.to_string()));
                Turn::Continue
            }
        }
    }

    /// Expires an overdue confirmation.
    pub fn tick(&mut self, now: Instant) {
        if let Some(candidate) = self.confirmation.expire(&mut self.state, now) {
            self.feedback.notify(&FeedbackEvent::ConfirmationCancelled {
                command_id: candidate.command_id().to_string(),
                reason: CancelReason::Timeout,
            });
        }
    }

    /// Runs one voice turn to completion.
    pub fn handle(&mut self, result: RecognitionResult, now: Instant) -> Turn {
        self.tick(now);
        let text = normalize(&result.text);
        if text.is_empty() {
            return Turn::Continue;
        }
        log::info!("heard \"{}\" ({:.2})", text, result.confidence);

        if self.state.is_awaiting() {
            return self.handle_reply(&text, result.confidence, now);
        }

        let command = if self.options.wake_word_enabled {
            let stripped = strip_wake_word(&text, &self.options.wake_word);
            if self.armed {
                self.armed = false;
                stripped.unwrap_or(text)
            } else {
                match stripped {
                    None => {
                        log::debug!("no wake word, ignoring");
                        return Turn::Continue;
                    }
                    Some(rest) if rest.is_empty() => {
                        self.armed = true;
                        self.feedback.notify(&FeedbackEvent::WakeWordHeard);
                        return Turn::Continue;
                    }
                    Some(rest) => rest,
                }
            }
        } else {
            text
        };
        if command.is_empty() {
            return Turn::Continue;
        }
        if self.is_exit(&command) {
            self.feedback.notify(&FeedbackEvent::Goodbye);
            return Turn::Exit;
        }
        self.interpret(&command, result.confidence, now);
        Turn::Continue
    }

    fn handle_reply(&mut self, text: &str, confidence: f64, now: Instant) -> Turn {
        if self.is_exit(text) {
            self.withdraw_pending();
            self.feedback.notify(&FeedbackEvent::Goodbye);
            return Turn::Exit;
        }
        if self.options.cancel_phrases.iter().any(|p| p == text) {
            self.withdraw_pending();
            return Turn::Continue;
        }
        let reply = if confidence < self.gate.confidence_threshold {
            Reply::Other
        } else {
            classify_reply(text)
        };
        match self.confirmation.on_reply(&mut self.state, reply, now) {
            ReplyOutcome::Confirmed(command) => self.dispatch(command),
            ReplyOutcome::Cancelled(candidate, reason) => {
                self.feedback.notify(&FeedbackEvent::ConfirmationCancelled {
                    command_id: candidate.command_id().to_string(),
                    reason,
                })
            }
            ReplyOutcome::Ignored => {
                if let Some(pending) = self.state.pending() {
                    self.feedback.notify(&FeedbackEvent::ConfirmationPending {
                        command_id: pending.candidate.command_id().to_string(),
                    });
                }
            }
            ReplyOutcome::NothingPending => self.interpret(text, confidence, now),
        }
        Turn::Continue
    }

    fn interpret(&mut self, text: &str, confidence: f64, now: Instant) {
        let candidates = self.matcher.match_text(text, &self.registry);
        match evaluate(confidence, candidates, &self.gate) {
            GateDecision::Rejected(reason) => {
                log::warn!("rejected \"{text}\": {reason}");
                self.feedback.notify(&FeedbackEvent::Rejected {
                    utterance: text.to_string(),
                    reason,
                });
            }
            GateDecision::Ambiguous(tied) => {
                let command_ids: Vec<String> =
                    tied.iter().map(|c| c.command_id().to_string()).collect();
                log::warn!("ambiguous \"{text}\": {}", command_ids.join(", "));
                self.feedback.notify(&FeedbackEvent::Ambiguous {
                    utterance: text.to_string(),
                    command_ids,
                });
            }
            GateDecision::Accepted(candidate) => {
                log::info!(
                    "accepted {} {} ({:.2})",
                    candidate.command_id(),
                    candidate.id,
                    candidate.score
                );
                match self.confirmation.admit(&mut self.state, candidate, now) {
                    Admission::Cleared(command) => self.dispatch(command),
                    Admission::ConfirmationRequested {
                        command_id, prompt, ..
                    } => self
                        .feedback
                        .notify(&FeedbackEvent::ConfirmationRequested { command_id, prompt }),
                    // Replies are routed before interpretation, so the gate is idle here.
                    Admission::Busy => {}
                }
            }
        }
    }

    fn dispatch(&mut self, command: ClearedCommand) {
        let outcome = self.dispatcher.dispatch(command);
        if let Some(DispatchError::UnknownHandler(handler)) = &outcome.error {
            log::error!(
                "misconfiguration: {} routes to unregistered handler {handler}",
                outcome.command_id
            );
        }
        self.feedback.notify(&FeedbackEvent::Dispatched(outcome));
    }

    fn withdraw_pending(&mut self) {
        if let Some(candidate) = self.confirmation.cancel(&mut self.state) {
            log::info!("{} {} cancelled", candidate.command_id(), candidate.id);
            self.feedback.notify(&FeedbackEvent::ConfirmationCancelled {
                command_id: candidate.command_id().to_string(),
                reason: CancelReason::Cancelled,
            });
        }
    }

    fn is_exit(&self, text: &str) -> bool {
        self.options.exit_phrases.iter().any(|p| p == text)
    }
}

/// Text after the wake word, or `None` when it was not said.
fn strip_wake_word(text: &str, wake_word: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let wake: Vec<&str> = wake_word.split_whitespace().collect();
    if wake.is_empty() || wake.len() > tokens.len() {
        return None;
    }
    let start = tokens.windows(wake.len()).position(|w| w == wake.as_slice())?;
    Some(tokens[start + wake.len()..].join(" "))
}
