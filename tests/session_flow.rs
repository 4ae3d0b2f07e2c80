use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use voice_nav_lib::config::{CommandEntry, CommandsDocument, Settings};
use voice_nav_lib::confidence::RejectReason;
use voice_nav_lib::confirmation::CancelReason;
use voice_nav_lib::dispatcher::{Handlers, Invocation};
use voice_nav_lib::error::{DispatchError, HandlerError};
use voice_nav_lib::feedback::{FeedbackEvent, RecordingFeedback};
use voice_nav_lib::registry::Registry;
use voice_nav_lib::session::{Session, Turn};
use voice_nav_lib::speech::{RecognitionResult, Scripted, ScriptedSource};

type Calls = Rc<RefCell<Vec<String>>>;

fn command(id: &str, patterns: &[&str], handler: &str, destructive: bool) -> CommandEntry {
    CommandEntry {
        id: id.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        destructive,
        handler: handler.to_string(),
        params: BTreeMap::new(),
    }
}

fn document() -> CommandsDocument {
    let mut applications = BTreeMap::new();
    applications.insert("chrome".to_string(), "google-chrome".to_string());
    applications.insert("firefox".to_string(), "firefox".to_string());
    let mut vocabularies = BTreeMap::new();
    vocabularies.insert("applications".to_string(), applications);

    CommandsDocument {
        vocabularies,
        commands: vec![
            command("open_app", &["open {app:applications}"], "open", false),
            command(
                "delete_folder",
                &["delete folder {name}", "remove folder {name}"],
                "delete",
                true,
            ),
            command("break_things", &["break things"], "broken", false),
            command("play_track", &["play {track}"], "play", false),
            command("play_radio", &["play {station}"], "play", false),
        ],
    }
}

fn handlers(calls: &Calls) -> Handlers {
    let mut handlers = Handlers::new();
    let open = Rc::clone(calls);
    handlers.register_fn("open", move |inv: &Invocation| {
        open.borrow_mut().push(format!("open {}", inv.require("app")?));
        Ok("Opening".to_string())
    });
    let delete = Rc::clone(calls);
    handlers.register_fn("delete", move |inv: &Invocation| {
        delete.borrow_mut().push(format!("delete {}", inv.require("name")?));
        Ok("Deleted".to_string())
    });
    let play = Rc::clone(calls);
    handlers.register_fn("play", move |inv: &Invocation| {
        play.borrow_mut().push(inv.command_id.clone());
        Ok("Playing".to_string())
    });
    handlers.register_fn("broken", |_: &Invocation| {
        Err(HandlerError::new("application path not found"))
    });
    handlers
}

type TestSession = Session<ScriptedSource, RecordingFeedback>;

fn session(settings: &Settings, source: ScriptedSource) -> (TestSession, Calls) {
    let calls: Calls = Rc::default();
    let handlers = handlers(&calls);
    let registry = Arc::new(Registry::load(&document(), |id| handlers.contains(id)).unwrap());
    let session = Session::new(
        settings,
        registry,
        handlers,
        source,
        RecordingFeedback::default(),
    );
    (session, calls)
}

fn run(settings: &Settings, source: ScriptedSource) -> (Vec<FeedbackEvent>, Vec<String>, usize) {
    let (mut session, calls) = session(settings, source);
    session.run();
    let remaining = session.source().remaining();
    let events = session.feedback().take();
    let calls = calls.borrow().clone();
    (events, calls, remaining)
}

fn say(lines: &[&str]) -> (Vec<FeedbackEvent>, Vec<String>, usize) {
    run(&Settings::default(), ScriptedSource::from_lines(lines))
}

#[test]
fn accepted_command_is_dispatched_with_resolved_slot() {
    let (events, calls, _) = say(&["open chrome"]);
    assert_eq!(calls, vec!["open google-chrome"]);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], FeedbackEvent::Ready);
    match &events[1] {
        FeedbackEvent::Dispatched(outcome) => {
            assert_eq!(outcome.command_id, "open_app");
            assert_eq!(outcome.message.as_deref(), Some("Opening"));
            assert!(outcome.success());
        }
        other => panic!("expected dispatch, got {other:?}"),
    }
}

#[test]
fn destructive_command_runs_after_yes() {
    let (events, calls, _) = say(&["delete folder temp", "yes"]);
    assert_eq!(calls, vec!["delete temp"]);
    assert!(matches!(
        &events[1],
        FeedbackEvent::ConfirmationRequested { command_id, prompt }
            if command_id == "delete_folder" && prompt.contains("yes or no")
    ));
    assert!(matches!(&events[2], FeedbackEvent::Dispatched(o) if o.success()));
}

#[test]
fn destructive_command_is_dropped_after_no() {
    let (events, calls, _) = say(&["remove folder temp", "no"]);
    assert!(calls.is_empty());
    assert_eq!(
        events.last(),
        Some(&FeedbackEvent::ConfirmationCancelled {
            command_id: "delete_folder".to_string(),
            reason: CancelReason::Declined,
        })
    );
}

#[test]
fn cancel_phrase_withdraws_pending_confirmation() {
    let (events, calls, _) = say(&["delete folder temp", "never mind", "yes"]);
    assert!(calls.is_empty());
    assert!(events.contains(&FeedbackEvent::ConfirmationCancelled {
        command_id: "delete_folder".to_string(),
        reason: CancelReason::Cancelled,
    }));
    // "yes" with nothing pending is just an unrecognized utterance
    assert!(matches!(
        events.last(),
        Some(FeedbackEvent::Rejected { reason: RejectReason::NoMatch, .. })
    ));
}

#[test]
fn unanswered_confirmation_times_out_and_late_yes_does_nothing() {
    let settings = Settings {
        confirmation_timeout_seconds: 0.05,
        ..Settings::default()
    };
    let source = ScriptedSource::new([
        Scripted::Say(RecognitionResult::new("delete folder temp", 1.0)),
        Scripted::Silence,
        Scripted::Say(RecognitionResult::new("yes", 1.0)),
    ]);
    let (events, calls, _) = run(&settings, source);
    assert!(calls.is_empty());
    assert_eq!(
        events[2],
        FeedbackEvent::ConfirmationCancelled {
            command_id: "delete_folder".to_string(),
            reason: CancelReason::Timeout,
        }
    );
    assert!(matches!(events[3], FeedbackEvent::Rejected { .. }));
}

#[test]
fn repeating_a_destructive_command_after_timeout_asks_again() {
    let settings = Settings {
        confirmation_timeout_seconds: 0.05,
        ..Settings::default()
    };
    let source = ScriptedSource::new([
        Scripted::Say(RecognitionResult::new("delete folder temp", 1.0)),
        Scripted::Silence,
        Scripted::Say(RecognitionResult::new("delete folder temp", 1.0)),
    ]);
    let (events, calls, _) = run(&settings, source);
    assert!(calls.is_empty());
    let requests = events
        .iter()
        .filter(|e| matches!(e, FeedbackEvent::ConfirmationRequested { .. }))
        .count();
    assert_eq!(requests, 2);
}

#[test]
fn other_commands_wait_while_confirmation_is_pending() {
    let (events, calls, _) = say(&["delete folder temp", "open chrome", "yes"]);
    assert_eq!(calls, vec!["delete temp"]);
    assert_eq!(
        events[2],
        FeedbackEvent::ConfirmationPending {
            command_id: "delete_folder".to_string()
        }
    );
}

#[test]
fn unsure_yes_does_not_confirm() {
    let source = ScriptedSource::new([
        Scripted::Say(RecognitionResult::new("delete folder temp", 1.0)),
        Scripted::Say(RecognitionResult::new("yes", 0.2)),
    ]);
    let (mut session, calls) = session(&Settings::default(), source);
    assert_eq!(session.step(), Turn::Continue);
    assert_eq!(session.step(), Turn::Continue);

    assert!(calls.borrow().is_empty());
    assert!(session.confirmation_state().is_awaiting());
    assert_eq!(
        session.feedback().take().last(),
        Some(&FeedbackEvent::ConfirmationPending {
            command_id: "delete_folder".to_string()
        })
    );
}

#[test]
fn exit_while_confirming_cancels_then_says_goodbye() {
    let (events, calls, _) = say(&["delete folder temp", "exit"]);
    assert!(calls.is_empty());
    assert_eq!(
        events[2..],
        [
            FeedbackEvent::ConfirmationCancelled {
                command_id: "delete_folder".to_string(),
                reason: CancelReason::Cancelled,
            },
            FeedbackEvent::Goodbye,
        ]
    );
}

#[test]
fn tied_commands_are_reported_as_ambiguous() {
    let (events, calls, _) = say(&["play yesterday"]);
    assert!(calls.is_empty());
    assert_eq!(
        events[1],
        FeedbackEvent::Ambiguous {
            utterance: "play yesterday".to_string(),
            command_ids: vec!["play_track".to_string(), "play_radio".to_string()],
        }
    );
}

#[test]
fn each_rejection_produces_exactly_one_event() {
    let source = ScriptedSource::new([
        Scripted::Say(RecognitionResult::new("make me a sandwich", 1.0)),
        Scripted::Say(RecognitionResult::new("open chrome", 0.2)),
    ]);
    let (events, calls, _) = run(&Settings::default(), source);
    assert!(calls.is_empty());
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[1],
        FeedbackEvent::Rejected { reason: RejectReason::NoMatch, utterance }
            if utterance == "make me a sandwich"
    ));
    assert!(matches!(
        events[2],
        FeedbackEvent::Rejected {
            reason: RejectReason::LowConfidence { .. },
            ..
        }
    ));
}

#[test]
fn wake_word_gates_commands() {
    let settings = Settings {
        wake_word_enabled: true,
        ..Settings::default()
    };
    let source = ScriptedSource::from_lines(&[
        "open chrome",
        "hey computer",
        "open firefox",
        "Hey computer, open chrome",
    ]);
    let (events, calls, _) = run(&settings, source);
    assert_eq!(calls, vec!["open firefox", "open google-chrome"]);
    assert_eq!(events[1], FeedbackEvent::WakeWordHeard);
    assert_eq!(events.len(), 4);
}

#[test]
fn exit_phrase_stops_the_session() {
    let (events, calls, remaining) = say(&["exit", "open chrome"]);
    assert!(calls.is_empty());
    assert_eq!(events, vec![FeedbackEvent::Ready, FeedbackEvent::Goodbye]);
    assert_eq!(remaining, 1);
}

#[test]
fn handler_failure_does_not_end_the_session() {
    let (events, calls, _) = say(&["break things", "open chrome"]);
    assert_eq!(calls, vec!["open google-chrome"]);
    match &events[1] {
        FeedbackEvent::Dispatched(outcome) => assert_eq!(
            outcome.error,
            Some(DispatchError::Handler(HandlerError::new(
                "application path not found"
            )))
        ),
        other => panic!("expected failed dispatch, got {other:?}"),
    }
    assert!(matches!(&events[2], FeedbackEvent::Dispatched(o) if o.success()));
}

#[test]
fn speech_failure_is_reported_and_listening_continues() {
    let source = ScriptedSource::new([
        Scripted::Fail("network unreachable".to_string()),
        Scripted::Say(RecognitionResult::new("open firefox", 0.9)),
    ]);
    let (events, calls, _) = run(&Settings::default(), source);
    assert_eq!(calls, vec!["open firefox"]);
    assert!(matches!(
        &events[1],
        FeedbackEvent::SpeechFailed(detail) if detail.contains("network")
    ));
}
