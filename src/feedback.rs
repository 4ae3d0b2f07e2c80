use crate::confidence::RejectReason;
use crate::confirmation::CancelReason;
use crate::dispatcher::DispatchOutcome;
use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    Ready,
    WakeWordHeard,
    Rejected {
        utterance: String,
        reason: RejectReason,
    },
    /// Near-tied commands, best first
    Ambiguous {
        utterance: String,
        command_ids: Vec<String>,
    },
    ConfirmationRequested {
        command_id: String,
        prompt: String,
    },
    /// A non-answer arrived while a confirmation is outstanding
    ConfirmationPending {
        command_id: String,
    },
    ConfirmationCancelled {
        command_id: String,
        reason: CancelReason,
    },
    Dispatched(DispatchOutcome),
    SpeechFailed(String),
    Goodbye,
}

impl FeedbackEvent {
    /// Sentence suitable for speaking or printing
    pub fn message(&self) -> String {
        match self {
            FeedbackEvent::Ready => "Voice navigation activated".to_string(),
            FeedbackEvent::WakeWordHeard => "Yes?".to_string(),
            FeedbackEvent::Rejected { reason, .. } => match reason {
                RejectReason::NoMatch => {
                    "Sorry, I didn't understand that. Try saying 'open chrome' or 'search for weather'."
                        .to_string()
                }
                RejectReason::LowConfidence { .. } => {
                    "Sorry, I didn't catch that clearly. Please repeat.".to_string()
                }
                RejectReason::WeakMatch { .. } => {
                    "I'm not sure which command you meant.".to_string()
                }
            },
            FeedbackEvent::Ambiguous { command_ids, .. } => format!(
                "That could mean several things: {}. Please be more specific.",
                command_ids
                    .iter()
                    .map(|id| id.replace('_', " "))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            FeedbackEvent::ConfirmationRequested { prompt, .. } => prompt.clone(),
            FeedbackEvent::ConfirmationPending { command_id } => format!(
                "Please say yes or no to {}.",
                command_id.replace('_', " ")
            ),
            FeedbackEvent::ConfirmationCancelled { command_id, reason } => {
                let action = command_id.replace('_', " ");
                match reason {
                    CancelReason::Declined => format!("Okay, I won't {action}."),
                    CancelReason::Timeout => format!("No answer, {action} cancelled."),
                    CancelReason::Cancelled => format!("{action} cancelled."),
                }
            }
            FeedbackEvent::Dispatched(outcome) => match (&outcome.message, &outcome.error) {
                (_, Some(error)) => format!("Error: {error}"),
                (Some(message), None) => message.clone(),
                (None, None) => "Done".to_string(),
            },
            FeedbackEvent::SpeechFailed(detail) => format!("Speech input problem: {detail}"),
            FeedbackEvent::Goodbye => "Goodbye!".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            FeedbackEvent::Rejected { .. }
            | FeedbackEvent::Ambiguous { .. }
            | FeedbackEvent::SpeechFailed(_) => true,
            FeedbackEvent::Dispatched(outcome) => !outcome.success(),
            _ => false,
        }
    }
}

/// Renders events to the user. Fire-and-forget: implementations swallow
/// their own failures.
pub trait Feedback {
    fn notify(&self, event: &FeedbackEvent);
}

/// Prints to the console and logs every event
#[derive(Debug, Default)]
pub struct ConsoleFeedback;

impl Feedback for ConsoleFeedback {
    fn notify(&self, event: &FeedbackEvent) {
        let message = event.message();
        if event.is_error() {
            log::warn!("feedback: {message}");
            println!("[assistant] ✗ {message}");
        } else {
            log::info!("feedback: {message}");
            println!("[assistant] {message}");
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingFeedback {
    events: RefCell<Vec<FeedbackEvent>>,
}

impl RecordingFeedback {
    pub fn take(&self) -> Vec<FeedbackEvent> {
        self.events.take()
    }
}

impl Feedback for RecordingFeedback {
    fn notify(&self, event: &FeedbackEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
