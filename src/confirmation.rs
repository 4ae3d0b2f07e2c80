//! Two-step confirmation for destructive commands.
//!
//! The pending slot lives in a [`ConfirmationState`] owned by the session and
//! lent to the gate for every transition. The dispatcher only accepts a
//! [`ClearedCommand`], and only this module can build one.

use crate::matcher::{normalize, CandidateMatch};
use std::time::{Duration, Instant};

const AFFIRMATIVE: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "sure",
    "ok",
    "okay",
    "confirm",
    "do it",
    "go ahead",
    "affirmative",
];

const NEGATIVE: &[&str] = &[
    "no",
    "nope",
    "cancel",
    "stop",
    "dont",
    "abort",
    "negative",
    "never mind",
];

/// A candidate released for execution
#[derive(Debug, Clone)]
pub struct ClearedCommand(CandidateMatch);

impl ClearedCommand {
    pub fn candidate(&self) -> &CandidateMatch {
        &self.0
    }

    pub fn into_candidate(self) -> CandidateMatch {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub candidate: CandidateMatch,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Default)]
pub enum ConfirmationState {
    #[default]
    Idle,
    AwaitingConfirmation(PendingConfirmation),
}

impl ConfirmationState {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, ConfirmationState::AwaitingConfirmation(_))
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        match self {
            ConfirmationState::AwaitingConfirmation(pending) => Some(pending),
            ConfirmationState::Idle => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirmative,
    Negative,
    Other,
}

/// Negative words win over affirmative ones ("yes, stop" cancels).
pub fn classify_reply(utterance: &str) -> Reply {
    let normalized = format!(" {} ", normalize(utterance));
    let contains = |phrase: &&str| normalized.contains(&format!(" {phrase} "));
    if NEGATIVE.iter().any(contains) {
        Reply::Negative
    } else if AFFIRMATIVE.iter().any(contains) {
        Reply::Affirmative
    } else {
        Reply::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Declined,
    Timeout,
    /// Withdrawn by the session, e.g. a global "cancel" or shutdown
    Cancelled,
}

#[derive(Debug)]
pub enum Admission {
    /// Non-destructive: straight to the dispatcher
    Cleared(ClearedCommand),
    /// Destructive: a confirmation request must be surfaced
    ConfirmationRequested {
        command_id: String,
        prompt: String,
        deadline: Instant,
    },
    /// A confirmation is already outstanding; the candidate was dropped
    Busy,
}

#[derive(Debug)]
pub enum ReplyOutcome {
    Confirmed(ClearedCommand),
    Cancelled(CandidateMatch, CancelReason),
    /// Not a yes/no answer; the timer keeps running
    Ignored,
    NothingPending,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationGate {
    timeout: Duration,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl ConfirmationGate {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Routes an accepted candidate: destructive ones wait for a reply.
    pub fn admit(
        &self,
        state: &mut ConfirmationState,
        candidate: CandidateMatch,
        now: Instant,
    ) -> Admission {
        if !candidate.template.destructive {
            return Admission::Cleared(ClearedCommand(candidate));
        }
        if state.is_awaiting() {
            log::warn!(
                "dropping {}: a confirmation is already pending",
                candidate.command_id()
            );
            return Admission::Busy;
        }
        let deadline = now + self.timeout;
        let command_id = candidate.command_id().to_string();
        let prompt = format!(
            "Are you sure you want to {}? Say yes or no.",
            candidate.describe()
        );
        log::info!(
            "{} {} awaiting confirmation for {:?}",
            command_id,
            candidate.id,
            self.timeout
        );
        *state = ConfirmationState::AwaitingConfirmation(PendingConfirmation {
            candidate,
            deadline,
        });
        Admission::ConfirmationRequested {
            command_id,
            prompt,
            deadline,
        }
    }

    /// Applies a classified reply. An expired confirmation is discarded
    /// before the reply is looked at.
    pub fn on_reply(
        &self,
        state: &mut ConfirmationState,
        reply: Reply,
        now: Instant,
    ) -> ReplyOutcome {
        if let Some(candidate) = self.expire(state, now) {
            return ReplyOutcome::Cancelled(candidate, CancelReason::Timeout);
        }
        match (reply, state.is_awaiting()) {
            (_, false) => ReplyOutcome::NothingPending,
            (Reply::Other, true) => ReplyOutcome::Ignored,
            (Reply::Affirmative, true) => match std::mem::take(state) {
                ConfirmationState::AwaitingConfirmation(pending) => {
                    let candidate = &pending.candidate;
                    log::info!("{} {} confirmed", candidate.command_id(), candidate.id);
                    ReplyOutcome::Confirmed(ClearedCommand(pending.candidate))
                }
                ConfirmationState::Idle => ReplyOutcome::NothingPending,
            },
            (Reply::Negative, true) => match self.discard(state) {
                Some(candidate) => ReplyOutcome::Cancelled(candidate, CancelReason::Declined),
                None => ReplyOutcome::NothingPending,
            },
        }
    }

    /// Discards the pending candidate once its deadline has passed.
    pub fn expire(&self, state: &mut ConfirmationState, now: Instant) -> Option<CandidateMatch> {
        let due = state.pending().is_some_and(|pending| now >= pending.deadline);
        if !due {
            return None;
        }
        let candidate = self.discard(state)?;
        log::warn!("{} {} confirmation timed out", candidate.command_id(), candidate.id);
        Some(candidate)
    }

    /// Withdraws the pending candidate without dispatching it.
    pub fn cancel(&self, state: &mut ConfirmationState) -> Option<CandidateMatch> {
        self.discard(state)
    }

    /// Time left before the pending confirmation expires
    pub fn remaining(&self, state: &ConfirmationState, now: Instant) -> Option<Duration> {
        state
            .pending()
            .map(|pending| pending.deadline.saturating_duration_since(now))
    }

    fn discard(&self, state: &mut ConfirmationState) -> Option<CandidateMatch> {
        match std::mem::take(state) {
            ConfirmationState::AwaitingConfirmation(pending) => Some(pending.candidate),
            ConfirmationState::Idle => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn clear_for_test(candidate: CandidateMatch) -> ClearedCommand {
    ClearedCommand(candidate)
}
