//! The control plane: create, transition and describe instances.
//!
//! Each call is independent. A transition reads the latest record, runs the
//! interpreter and appends the result; nothing locks the instance in between.

use crate::error::ServerError;
use crate::metrics::Metrics;
use durafsm_core::{ApplyResult, Instance, InstanceRecord, Interpreter, Plan};
use durafsm_store::InstanceStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Longest accepted instance id or trigger.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Control plane settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPlaneConfig {
    /// Append transitions with [`InstanceStore::append_if_latest`].
    pub optimistic_concurrency: bool,
}

/// Returned by [`ControlPlane::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateResult {
    pub id: String,
    pub state: String,
}

/// Returned by [`ControlPlane::transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResult {
    pub id: String,
    pub from_state: String,
    pub to_state: String,
    pub trigger: String,
    pub dispatched: Vec<String>,
    pub dispatch_failures: usize,
}

/// Checks an instance id or trigger: 1 to 128 characters from
/// `[A-Za-z0-9._:-]`.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), ServerError> {
    if value.is_empty() {
        return Err(ServerError::InvalidRequest(format!("{} must not be empty", kind)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ServerError::InvalidRequest(format!(
            "{} exceeds {} characters",
            kind, MAX_IDENTIFIER_LEN
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
    {
        return Err(ServerError::InvalidRequest(format!(
            "{} contains invalid character {:?}",
            kind, c
        )));
    }
    Ok(())
}

pub struct ControlPlane {
    interpreter: Arc<Interpreter>,
    store: Arc<dyn InstanceStore>,
    config: ControlPlaneConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ControlPlane {
    pub fn new(
        interpreter: Arc<Interpreter>,
        store: Arc<dyn InstanceStore>,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            interpreter,
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.instances.set(self.store.instance_count() as f64);
        self.metrics = Some(metrics);
        self
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    /// Creates an instance in the machine's initial state.
    ///
    /// Without an id a UUID is generated. A supplied id that already has
    /// records is refused, so create never resets an existing instance.
    pub fn create(&self, id: Option<String>) -> Result<CreateResult, ServerError> {
        if let Some(ref id) = id {
            validate_identifier("instance id", id)?;
            if self.store.latest(id)?.is_some() {
                return Err(ServerError::InstanceExists(id.clone()));
            }
        }

        let plan = self.interpreter.plan_initialize(id);
        let (_, record) = self.commit(&plan, None)?;

        tracing::info!(
            "Created instance {} in state '{}'",
            record.id,
            record.state
        );
        Ok(CreateResult {
            id: record.id,
            state: record.state,
        })
    }

    /// Applies `trigger` with `payload` to the instance's latest state.
    ///
    /// Rejected triggers leave the store untouched.
    pub fn transition(
        &self,
        id: &str,
        trigger: &str,
        payload: &Value,
    ) -> Result<TransitionResult, ServerError> {
        validate_identifier("instance id", id)?;
        validate_identifier("trigger", trigger)?;

        let latest = self
            .store
            .latest(id)?
            .ok_or_else(|| ServerError::InstanceNotFound(id.to_string()))?;
        let instance = Instance::from_record(&latest);

        let plan = self.interpreter.plan(&instance, trigger, payload)?;
        let (result, record) = self.commit(&plan, Some(&latest))?;

        tracing::info!(
            "Instance {}: '{}' --{}--> '{}'",
            id,
            latest.state,
            trigger,
            record.state
        );
        Ok(TransitionResult {
            id: record.id,
            from_state: latest.state,
            to_state: record.state,
            trigger: result.trigger,
            dispatched: result.dispatched,
            dispatch_failures: result.dispatch_failures,
        })
    }

    /// The instance's latest record.
    pub fn describe(&self, id: &str) -> Result<InstanceRecord, ServerError> {
        validate_identifier("instance id", id)?;
        self.store
            .latest(id)?
            .ok_or_else(|| ServerError::InstanceNotFound(id.to_string()))
    }

    /// Fires the plan's tasks and appends its record.
    ///
    /// In optimistic mode the conditional append goes first and tasks fire
    /// only once it has landed, so a writer that lost the race fires nothing.
    fn commit(
        &self,
        plan: &Plan,
        expected: Option<&InstanceRecord>,
    ) -> Result<(ApplyResult, InstanceRecord), ServerError> {
        let record = plan.record();
        let result = if self.config.optimistic_concurrency {
            self.store.append_if_latest(&record, expected)?;
            self.interpreter.fire(plan)
        } else {
            let result = self.interpreter.fire(plan);
            self.store.append(&record)?;
            result
        };
        self.observe(&result);
        Ok((result, record))
    }

    fn observe(&self, result: &ApplyResult) {
        let Some(ref metrics) = self.metrics else {
            return;
        };
        metrics.records_appended_total.inc();
        metrics.instances.set(self.store.instance_count() as f64);
        if let Some(ref from) = result.from_state {
            metrics
                .transitions_total
                .with_label_values(&[from.as_str(), result.to_state.as_str()])
                .inc();
        }
        metrics
            .task_dispatch_total
            .with_label_values(&["accepted"])
            .inc_by(result.dispatched.len() as f64);
        metrics
            .task_dispatch_total
            .with_label_values(&["failed"])
            .inc_by(result.dispatch_failures as f64);
    }
}
