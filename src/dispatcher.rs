use crate::confirmation::ClearedCommand;
use crate::error::{DispatchError, HandlerError};
use crate::matcher::{MatchId, ParsedSlot};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Outcomes kept for replay to a duplicate delivery
const REMEMBERED_OUTCOMES: usize = 256;

/// Everything a handler gets to see about one accepted command
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command_id: String,
    pub match_id: MatchId,
    pub slots: Vec<ParsedSlot>,
    /// Vocabulary slot → resolved value
    pub resolved: BTreeMap<String, String>,
    /// Static parameters from the command document
    pub params: BTreeMap<String, Value>,
}

impl Invocation {
    pub fn slot(&self, name: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }

    /// Resolved vocabulary value if any, otherwise the spoken text
    pub fn value(&self, name: &str) -> Option<&str> {
        self.resolved
            .get(name)
            .map(String::as_str)
            .or_else(|| self.slot(name))
    }

    pub fn require(&self, name: &str) -> Result<&str, HandlerError> {
        self.value(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HandlerError::new(format!("missing slot {name}")))
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// An action the dispatcher can invoke by id
pub trait ActionHandler {
    /// Performs the action, returning a short message for the user.
    fn invoke(&self, invocation: &Invocation) -> Result<String, HandlerError>;
}

struct FnHandler<F>(F);

impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&Invocation) -> Result<String, HandlerError>,
{
    fn invoke(&self, invocation: &Invocation) -> Result<String, HandlerError> {
        (self.0)(invocation)
    }
}

/// handler_id → handler
#[derive(Default)]
pub struct Handlers {
    map: HashMap<String, Box<dyn ActionHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> &mut Self {
        self.map.insert(id.into(), Box::new(handler));
        self
    }

    pub fn register_fn<F>(&mut self, id: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Invocation) -> Result<String, HandlerError> + 'static,
    {
        self.register(id, FnHandler(f))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<&dyn ActionHandler> {
        self.map.get(id).map(|h| h.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub command_id: String,
    pub match_id: MatchId,
    /// Handler message on success
    pub message: Option<String>,
    pub error: Option<DispatchError>,
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Invokes handlers at most once per accepted match.
pub struct Dispatcher {
    handlers: Handlers,
    /// Every match ever dispatched; never evicted
    dispatched: HashSet<MatchId>,
    completed: HashMap<MatchId, DispatchOutcome>,
    order: VecDeque<MatchId>,
}

impl Dispatcher {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers,
            dispatched: HashSet::new(),
            completed: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Runs the command's handler. A repeated delivery of the same match
    /// never runs anything: it gets the recorded outcome while that is still
    /// remembered, otherwise an `AlreadyDispatched` error. Failures are
    /// reported in the outcome and never retried.
    pub fn dispatch(&mut self, command: ClearedCommand) -> DispatchOutcome {
        let candidate = command.into_candidate();
        if !self.dispatched.insert(candidate.id) {
            log::warn!(
                "{} {} already dispatched, ignoring duplicate delivery",
                candidate.command_id(),
                candidate.id
            );
            return match self.completed.get(&candidate.id) {
                Some(previous) => previous.clone(),
                None => DispatchOutcome {
                    command_id: candidate.command_id().to_string(),
                    match_id: candidate.id,
                    message: None,
                    error: Some(DispatchError::AlreadyDispatched(candidate.id)),
                },
            };
        }

        let template = &candidate.template;
        let result = match self.handlers.get(&template.handler_id) {
            None => {
                log::error!(
                    "{}: handler {} is not registered",
                    template.id,
                    template.handler_id
                );
                Err(DispatchError::UnknownHandler(template.handler_id.clone()))
            }
            Some(handler) => {
                let invocation = Invocation {
                    command_id: template.id.clone(),
                    match_id: candidate.id,
                    slots: candidate.slots.clone(),
                    resolved: candidate.resolved.clone(),
                    params: template.params.clone(),
                };
                log::info!(
                    "dispatching {} {} via {}",
                    template.id,
                    candidate.id,
                    template.handler_id
                );
                handler.invoke(&invocation).map_err(|e| {
                    log::error!("{} failed: {e}", template.id);
                    DispatchError::from(e)
                })
            }
        };

        let (message, error) = match result {
            Ok(message) => (Some(message), None),
            Err(e) => (None, Some(e)),
        };
        let outcome = DispatchOutcome {
            command_id: template.id.clone(),
            match_id: candidate.id,
            message,
            error,
        };
        self.remember(outcome.clone());
        outcome
    }

    fn remember(&mut self, outcome: DispatchOutcome) {
        if self.order.len() == REMEMBERED_OUTCOMES {
            if let Some(oldest) = self.order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
        self.order.push_back(outcome.match_id);
        self.completed.insert(outcome.match_id, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandEntry, CommandsDocument};
    use crate::confirmation::clear_for_test;
    use crate::matcher::{CandidateMatch, Matcher};
    use crate::registry::Registry;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn candidate(utterance: &str, handler: &str) -> CandidateMatch {
        let mut params = BTreeMap::new();
        params.insert("greeting".to_string(), json!("hello"));
        let document = CommandsDocument {
            vocabularies: BTreeMap::new(),
            commands: vec![CommandEntry {
                id: "open_app".to_string(),
                patterns: vec!["open {app}".to_string()],
                destructive: false,
                handler: handler.to_string(),
                params,
            }],
        };
        let registry = Registry::load(&document, |_| true).unwrap();
        Matcher::default()
            .match_text(utterance, &registry)
            .into_iter()
            .next()
            .unwrap()
    }

    fn counting(calls: &Rc<Cell<u32>>) -> Handlers {
        let calls = Rc::clone(calls);
        let mut handlers = Handlers::new();
        handlers.register_fn("open_app", move |inv: &Invocation| {
            calls.set(calls.get() + 1);
            Ok(format!(
                "{} {}",
                inv.param_str("greeting").unwrap_or_default(),
                inv.require("app")?
            ))
        });
        handlers.register_fn("broken", |_: &Invocation| {
            Err(HandlerError::new("application path not found"))
        });
        handlers
    }

    #[test]
    fn successful_dispatch_reports_the_message() {
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new(counting(&calls));
        let outcome = dispatcher.dispatch(clear_for_test(candidate("open chrome", "open_app")));
        assert!(outcome.success());
        assert_eq!(outcome.message.as_deref(), Some("hello chrome"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn duplicate_delivery_runs_the_handler_once() {
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new(counting(&calls));
        let cleared = clear_for_test(candidate("open chrome", "open_app"));
        let first = dispatcher.dispatch(cleared.clone());
        let second = dispatcher.dispatch(cleared);
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);

        // A fresh match of the same phrase is a new turn.
        dispatcher.dispatch(clear_for_test(candidate("open chrome", "open_app")));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn duplicate_delivery_is_refused_after_its_outcome_is_forgotten() {
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new(counting(&calls));
        let first = clear_for_test(candidate("open chrome", "open_app"));
        dispatcher.dispatch(first.clone());
        for _ in 0..REMEMBERED_OUTCOMES {
            dispatcher.dispatch(clear_for_test(candidate("open firefox", "open_app")));
        }
        assert_eq!(calls.get(), REMEMBERED_OUTCOMES as u32 + 1);

        let match_id = first.candidate().id;
        let outcome = dispatcher.dispatch(first);
        assert_eq!(calls.get(), REMEMBERED_OUTCOMES as u32 + 1);
        assert_eq!(outcome.error, Some(DispatchError::AlreadyDispatched(match_id)));
    }

    #[test]
    fn handler_error_is_reported_not_retried() {
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new(counting(&calls));
        let cleared = clear_for_test(candidate("open chrome", "broken"));
        let outcome = dispatcher.dispatch(cleared.clone());
        assert!(!outcome.success());
        assert_eq!(
            outcome.error,
            Some(DispatchError::Handler(HandlerError::new(
                "application path not found"
            )))
        );
        assert_eq!(dispatcher.dispatch(cleared), outcome);
    }

    #[test]
    fn unregistered_handler_is_unknown_handler() {
        let mut dispatcher = Dispatcher::new(Handlers::new());
        let outcome = dispatcher.dispatch(clear_for_test(candidate("open chrome", "ghost")));
        assert_eq!(
            outcome.error,
            Some(DispatchError::UnknownHandler("ghost".to_string()))
        );
    }
}
