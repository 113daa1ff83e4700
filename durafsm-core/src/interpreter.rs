//! The state machine interpreter.
//!
//! Pure transition logic plus task dispatch. It never touches storage:
//! callers load an [`Instance`], call [`Interpreter::apply`] and persist the
//! returned instance themselves.

use crate::definition::MachineDefinition;
use crate::error::CoreError;
use crate::instance::{Instance, InstanceRecord};
use crate::invoker::TaskInvoker;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Event name recorded in `_meta` for tasks fired by [`Interpreter::initialize`].
pub const INITIALIZE_EVENT: &str = "initialize";

/// Outcome of a successful transition (or initialization).
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// The instance in its new state. `version` still points at the record it
    /// was loaded from.
    pub instance: Instance,
    /// `None` when the instance was just initialized.
    pub from_state: Option<String>,
    pub to_state: String,
    pub trigger: String,
    /// Tasks the invoker accepted, in firing order.
    pub dispatched: Vec<String>,
    /// Tasks the invoker refused. Logged, never raised.
    pub dispatch_failures: usize,
}

/// A selected transition whose tasks have not been dispatched yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The instance as loaded, still in the source state.
    pub instance: Instance,
    /// `None` when the plan initializes the instance.
    pub from_state: Option<String>,
    pub to_state: String,
    pub trigger: String,
    payload: Value,
    exit_tasks: Vec<String>,
    entry_tasks: Vec<String>,
}

impl Plan {
    /// The record to append once the transition is taken.
    pub fn record(&self) -> InstanceRecord {
        let mut next = self.instance.clone();
        next.state = self.to_state.clone();
        next.to_record()
    }
}

/// Runs transitions of one machine definition.
pub struct Interpreter {
    definition: Arc<MachineDefinition>,
    invoker: Arc<dyn TaskInvoker>,
}

impl Interpreter {
    pub fn new(definition: Arc<MachineDefinition>, invoker: Arc<dyn TaskInvoker>) -> Self {
        Self {
            definition,
            invoker,
        }
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    /// Triggers accepted from `state`, whether or not their guards would pass.
    pub fn trigger_names(&self, state: &str) -> Vec<&str> {
        self.definition.triggers_from(state)
    }

    /// Plans the creation of an instance in the initial state. A missing id
    /// is replaced with a fresh UUID.
    pub fn plan_initialize(&self, id: Option<String>) -> Plan {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let initial = self.definition.initial();
        Plan {
            instance: Instance::new(id, initial.name.clone()),
            from_state: None,
            to_state: initial.name.clone(),
            trigger: INITIALIZE_EVENT.to_string(),
            payload: Value::Null,
            exit_tasks: Vec::new(),
            entry_tasks: initial.on_entry.clone(),
        }
    }

    /// Creates an instance in the initial state and fires that state's
    /// entry tasks.
    pub fn initialize(&self, id: Option<String>) -> ApplyResult {
        let result = self.fire(&self.plan_initialize(id));
        tracing::debug!(
            "Initialized instance {} in state '{}'",
            result.instance.id,
            result.to_state
        );
        result
    }

    /// Selects the transition `trigger` takes from `instance`'s state
    /// without firing any task.
    ///
    /// Transitions leaving the current state on `trigger` are tried in
    /// declaration order; the first whose guards pass is taken.
    pub fn plan(
        &self,
        instance: &Instance,
        trigger: &str,
        payload: &Value,
    ) -> Result<Plan, CoreError> {
        let source = self
            .definition
            .state(&instance.state)
            .ok_or_else(|| CoreError::UnknownState {
                state: instance.state.clone(),
            })?;

        let mut candidates = self.definition.candidates(&source.name, trigger).peekable();
        if candidates.peek().is_none() {
            return Err(CoreError::NoSuchTrigger {
                state: instance.state.clone(),
                trigger: trigger.to_string(),
            });
        }
        let selected = candidates
            .find(|t| t.permits(instance, payload))
            .ok_or_else(|| CoreError::GuardRejected {
                state: instance.state.clone(),
                trigger: trigger.to_string(),
            })?;
        let destination = self
            .definition
            .state(&selected.destination)
            .ok_or_else(|| CoreError::UnknownState {
                state: selected.destination.clone(),
            })?;

        Ok(Plan {
            instance: instance.clone(),
            from_state: Some(source.name.clone()),
            to_state: destination.name.clone(),
            trigger: trigger.to_string(),
            payload: payload.clone(),
            exit_tasks: source.on_exit.clone(),
            entry_tasks: destination.on_entry.clone(),
        })
    }

    /// Applies `trigger` to `instance`: [`plan`](Self::plan), then
    /// [`fire`](Self::fire).
    ///
    /// Exit tasks of the source run before the state changes, entry tasks of
    /// the destination after. Self-transitions run both.
    pub fn apply(
        &self,
        instance: &Instance,
        trigger: &str,
        payload: &Value,
    ) -> Result<ApplyResult, CoreError> {
        let plan = self.plan(instance, trigger, payload)?;
        Ok(self.fire(&plan))
    }

    /// Dispatches the planned exit and entry tasks and moves the instance to
    /// the destination state.
    pub fn fire(&self, plan: &Plan) -> ApplyResult {
        let mut result = ApplyResult {
            instance: plan.instance.clone(),
            from_state: plan.from_state.clone(),
            to_state: plan.to_state.clone(),
            trigger: plan.trigger.clone(),
            dispatched: Vec::new(),
            dispatch_failures: 0,
        };

        let transition = json!({
            "source": plan.from_state,
            "destination": plan.to_state,
        });
        if let Some(ref source) = plan.from_state {
            for task in &plan.exit_tasks {
                let body = enrich(&plan.payload, source, &plan.trigger, transition.clone());
                self.dispatch_task(task, body, &mut result);
            }
        }

        result.instance.state = plan.to_state.clone();
        for task in &plan.entry_tasks {
            let body = enrich(&plan.payload, &plan.to_state, &plan.trigger, transition.clone());
            self.dispatch_task(task, body, &mut result);
        }

        if let Some(ref source) = plan.from_state {
            tracing::debug!(
                "Instance {}: '{}' --{}--> '{}' ({} task(s) dispatched)",
                plan.instance.id,
                source,
                plan.trigger,
                plan.to_state,
                result.dispatched.len()
            );
        }
        result
    }

    fn dispatch_task(&self, task: &str, body: Value, result: &mut ApplyResult) {
        match self.invoker.dispatch(task, body) {
            Ok(()) => result.dispatched.push(task.to_string()),
            Err(e) => {
                result.dispatch_failures += 1;
                tracing::warn!(
                    "Dispatch of task '{}' for instance {} failed: {}",
                    task,
                    result.instance.id,
                    e
                );
            }
        }
    }
}

/// Adds `_meta` to a copy of the caller's payload.
///
/// Object payloads keep their keys (a caller-supplied `_meta` is replaced),
/// `null` becomes an empty object, and anything else is nested under
/// `"payload"`.
pub fn enrich(payload: &Value, state: &str, event: &str, transition: Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    body.insert(
        "_meta".to_string(),
        json!({
            "state": state,
            "event": event,
            "transition": transition,
        }),
    );
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{StateDefinition, TransitionDefinition};
    use crate::invoker::InvokeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    /// Records dispatches; refuses tasks listed in `refuse`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
        refuse: Vec<&'static str>,
    }

    impl Recorder {
        fn tasks(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
        }

        fn take(&self) -> Vec<(String, Value)> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    #[async_trait]
    impl TaskInvoker for Recorder {
        fn dispatch(&self, task: &str, payload: Value) -> Result<(), InvokeError> {
            if self.refuse.iter().any(|r| *r == task) {
                return Err(InvokeError::Rejected {
                    task: task.to_string(),
                    reason: "queue full".to_string(),
                });
            }
            self.calls.lock().push((task.to_string(), payload));
            Ok(())
        }

        async fn call(&self, _task: &str, _payload: Value) -> Result<Value, InvokeError> {
            Ok(Value::Null)
        }
    }

    fn setup(recorder: Recorder) -> (Arc<Recorder>, Interpreter) {
        let recorder = Arc::new(recorder);
        let def = crate::document_review::definition().unwrap();
        let interpreter = Interpreter::new(Arc::new(def), recorder.clone());
        (recorder, interpreter)
    }

    fn step(interp: &Interpreter, instance: &Instance, trigger: &str, payload: Value) -> Instance {
        interp.apply(instance, trigger, &payload).unwrap().instance
    }

    #[test]
    fn test_initialize() {
        let (recorder, interp) = setup(Recorder::default());
        let result = interp.initialize(None);
        assert_eq!(result.instance.state, "initial");
        assert!(result.from_state.is_none());
        assert!(result.instance.version.is_none());
        assert!(uuid::Uuid::parse_str(&result.instance.id).is_ok());
        assert!(recorder.tasks().is_empty());

        let named = interp.initialize(Some("abc".to_string()));
        assert_eq!(named.instance.id, "abc");
    }

    #[test]
    fn test_trigger_names() {
        let (_, interp) = setup(Recorder::default());
        assert_eq!(interp.trigger_names("uploaded"), vec!["approve", "reject"]);
        assert_eq!(interp.trigger_names("initial"), vec!["upload"]);
        assert!(interp.trigger_names("approved").is_empty());
        assert!(interp.trigger_names("nowhere").is_empty());
    }

    #[test]
    fn test_initial_entry_tasks_fire() {
        let recorder = Arc::new(Recorder::default());
        let def = MachineDefinition::builder("m")
            .initial("open")
            .state(StateDefinition::new("open").on_entry(["welcome"]))
            .build()
            .unwrap();
        let interp = Interpreter::new(Arc::new(def), recorder.clone());

        let result = interp.initialize(Some("x".to_string()));
        assert_eq!(result.dispatched, vec!["welcome"]);
        let (_, body) = &recorder.take()[0];
        assert_eq!(
            body["_meta"],
            json!({
                "state": "open",
                "event": "initialize",
                "transition": {"source": null, "destination": "open"}
            })
        );
    }

    #[test]
    fn test_document_review_scenario() {
        let (recorder, interp) = setup(Recorder::default());
        let doc = interp.initialize(Some("abc".to_string())).instance;

        let uploaded = step(&interp, &doc, "upload", json!({}));
        assert_eq!(uploaded.state, "uploaded");
        assert_eq!(recorder.tasks(), vec!["notifyReviewer"]);
        recorder.take();

        let processing = step(&interp, &uploaded, "approve", json!({"long": true}));
        assert_eq!(processing.state, "processing");
        assert_eq!(recorder.tasks(), vec!["summarize"]);
        recorder.take();

        let approved = step(&interp, &uploaded, "approve", json!({"long": false}));
        assert_eq!(approved.state, "approved");
        assert_eq!(recorder.tasks(), vec!["notifyUploader"]);
        recorder.take();

        let done = step(&interp, &processing, "processed", json!({}));
        assert_eq!(done.state, "approved");
        assert_eq!(recorder.tasks(), vec!["archive", "notifyUploader"]);
        recorder.take();

        let rejected = step(&interp, &uploaded, "reject", json!({}));
        assert_eq!(rejected.state, "rejected");
        assert_eq!(recorder.tasks(), vec!["delete", "notifyUploader"]);

        let err = interp.apply(&rejected, "reject", &json!({})).unwrap_err();
        assert!(matches!(err, CoreError::NoSuchTrigger { ref state, .. } if state == "rejected"));
    }

    #[test]
    fn test_enrichment_metadata() {
        let (recorder, interp) = setup(Recorder::default());
        let processing = Instance::new("abc", "processing");
        interp
            .apply(&processing, "processed", &json!({"summary": "ok", "_meta": "spoofed"}))
            .unwrap();

        let calls = recorder.take();
        assert_eq!(calls.len(), 2);
        let (exit_task, exit_body) = &calls[0];
        assert_eq!(exit_task, "archive");
        assert_eq!(
            exit_body,
            &json!({
                "summary": "ok",
                "_meta": {
                    "state": "processing",
                    "event": "processed",
                    "transition": {"source": "processing", "destination": "approved"}
                }
            })
        );
        let (_, entry_body) = &calls[1];
        assert_eq!(entry_body["_meta"]["state"], "approved");
        assert_eq!(entry_body["summary"], "ok");
    }

    #[test]
    fn test_enrich_non_object_payloads() {
        let meta = json!({"source": "a", "destination": "b"});
        let wrapped = enrich(&json!([1, 2]), "b", "go", meta.clone());
        assert_eq!(wrapped["payload"], json!([1, 2]));
        let empty = enrich(&Value::Null, "b", "go", meta);
        assert_eq!(empty.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_rejected_leaves_instance_untouched() {
        let recorder = Arc::new(Recorder::default());
        let def = MachineDefinition::builder("m")
            .initial("a")
            .state(StateDefinition::new("a").on_exit(["bye"]))
            .state(StateDefinition::new("b"))
            .transition(
                TransitionDefinition::new("go", "a", "b")
                    .guard(|_: &Instance, p: &Value| p["ok"] == json!(true)),
            )
            .build()
            .unwrap();
        let interp = Interpreter::new(Arc::new(def), recorder.clone());
        let inst = Instance::new("i", "a");

        let err = interp.apply(&inst, "go", &json!({"ok": false})).unwrap_err();
        assert!(matches!(err, CoreError::GuardRejected { .. }));
        assert_eq!(inst.state, "a");
        assert!(recorder.tasks().is_empty());

        assert!(matches!(
            interp.apply(&inst, "stop", &json!({})),
            Err(CoreError::NoSuchTrigger { .. })
        ));
    }

    #[test]
    fn test_plan_fires_nothing_until_fired() {
        let (recorder, interp) = setup(Recorder::default());
        let mut uploaded = Instance::new("abc", "uploaded");
        uploaded.version = Some(crate::instance::next_timestamp(None));

        let plan = interp.plan(&uploaded, "reject", &json!({"why": "spam"})).unwrap();
        assert!(recorder.tasks().is_empty());
        assert_eq!(plan.from_state.as_deref(), Some("uploaded"));
        assert_eq!(plan.to_state, "rejected");

        let record = plan.record();
        assert_eq!((record.id.as_str(), record.state.as_str()), ("abc", "rejected"));
        assert!(Some(record.created_at) > uploaded.version);

        let result = interp.fire(&plan);
        assert_eq!(result.instance.state, "rejected");
        assert_eq!(recorder.tasks(), vec!["delete", "notifyUploader"]);
        let (_, body) = &recorder.take()[0];
        assert_eq!(body["why"], "spam");
        assert_eq!(body["_meta"]["event"], "reject");
    }

    #[test]
    fn test_plan_initialize() {
        let (recorder, interp) = setup(Recorder::default());
        let plan = interp.plan_initialize(Some("new".to_string()));
        assert!(plan.from_state.is_none());
        assert_eq!(plan.record().state, "initial");
        assert!(interp.fire(&plan).dispatched.is_empty());
        assert!(recorder.tasks().is_empty());
    }

    #[test]
    fn test_unknown_state() {
        let (_, interp) = setup(Recorder::default());
        let stale = Instance::new("abc", "archived");
        assert!(matches!(
            interp.apply(&stale, "upload", &json!({})),
            Err(CoreError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_dispatch_failure_does_not_fail_transition() {
        let (recorder, interp) = setup(Recorder {
            refuse: vec!["delete"],
            ..Default::default()
        });
        let uploaded = Instance::new("abc", "uploaded");
        let result = interp.apply(&uploaded, "reject", &json!({})).unwrap();
        assert_eq!(result.instance.state, "rejected");
        assert_eq!(result.dispatch_failures, 1);
        assert_eq!(result.dispatched, vec!["notifyUploader"]);
        assert_eq!(recorder.tasks(), vec!["notifyUploader"]);
    }

    #[test]
    fn test_self_transition_runs_exit_and_entry() {
        let recorder = Arc::new(Recorder::default());
        let def = MachineDefinition::builder("m")
            .initial("a")
            .state(StateDefinition::new("a").on_entry(["in"]).on_exit(["out"]))
            .transition(TransitionDefinition::new("again", "a", "a"))
            .build()
            .unwrap();
        let interp = Interpreter::new(Arc::new(def), recorder.clone());
        let result = interp.apply(&Instance::new("i", "a"), "again", &json!({})).unwrap();
        assert_eq!(result.instance.state, "a");
        assert_eq!(recorder.tasks(), vec!["out", "in"]);
    }

    proptest! {
        /// Whatever the guard outcomes, the first passing guard in
        /// declaration order picks the destination.
        #[test]
        fn test_first_passing_guard_wins(outcomes in proptest::collection::vec(any::<bool>(), 1..6)) {
            let mut builder = MachineDefinition::builder("m")
                .initial("start")
                .state(StateDefinition::new("start"));
            for (i, pass) in outcomes.iter().copied().enumerate() {
                let name = format!("s{}", i);
                builder = builder
                    .state(StateDefinition::new(name.clone()))
                    .transition(
                        TransitionDefinition::new("go", "start", name)
                            .guard(move |_: &Instance, _: &Value| pass),
                    );
            }
            let interp = Interpreter::new(Arc::new(builder.build().unwrap()), Arc::new(Recorder::default()));
            let result = interp.apply(&Instance::new("i", "start"), "go", &Value::Null);

            match outcomes.iter().position(|p| *p) {
                Some(first) => prop_assert_eq!(result.unwrap().to_state, format!("s{}", first)),
                None => prop_assert!(matches!(result, Err(CoreError::GuardRejected { .. })), "expected GuardRejected"),
            }
        }
    }
}
