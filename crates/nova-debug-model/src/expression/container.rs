use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{ContainerEnv, EvaluateContext, Variable, DEFAULT_VALUE, START_SESSION_FIRST};
use crate::error::SessionError;
use crate::protocol::{
    self, EvaluateLocation, SetValueResponse, VariablePresentationHint, VariablesFilter,
};
use crate::session::DebugSession;

const TARGET: &str = "nova.debug_model";

/// Initial state of a container.
#[derive(Clone, Default)]
pub struct ContainerOptions {
    pub session: Option<Arc<dyn DebugSession>>,
    pub thread_id: Option<i64>,
    pub reference: i64,
    pub named_variables: Option<i64>,
    pub indexed_variables: Option<i64>,
    /// First index covered by this container when it is a virtual range node.
    pub start_of_variables: i64,
    pub memory_reference: Option<String>,
    pub presentation_hint: Option<VariablePresentationHint>,
    pub type_: Option<String>,
    pub value_location_reference: Option<i64>,
}

struct ContainerState {
    session: Option<Arc<dyn DebugSession>>,
    thread_id: Option<i64>,
    reference: i64,
    /// Bumped on every reference assignment; children computed for an older
    /// generation are never handed out again.
    generation: u64,
    named_variables: i64,
    indexed_variables: i64,
    memory_reference: Option<String>,
    value: String,
    value_changed: bool,
    type_: Option<String>,
    presentation_hint: Option<VariablePresentationHint>,
    value_location_reference: Option<i64>,
    lazy_resolved_at: Option<u64>,
}

impl ContainerState {
    fn assign_reference(&mut self, reference: i64) {
        self.reference = reference;
        self.generation += 1;
    }
}

struct ChildrenSlot {
    generation: u64,
    cell: Arc<OnceCell<Vec<Arc<Variable>>>>,
}

/// A value that may have adapter-side children addressed by a variables reference.
pub struct ExpressionContainer {
    id: String,
    start_of_variables: i64,
    env: ContainerEnv,
    state: Mutex<ContainerState>,
    children: Mutex<Option<ChildrenSlot>>,
}

impl fmt::Debug for ExpressionContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExpressionContainer")
            .field("id", &self.id)
            .field("reference", &state.reference)
            .field("value", &state.value)
            .field("named_variables", &state.named_variables)
            .field("indexed_variables", &state.indexed_variables)
            .finish_non_exhaustive()
    }
}

impl ExpressionContainer {
    pub fn new(id: impl Into<String>, env: ContainerEnv, options: ContainerOptions) -> Self {
        Self {
            id: id.into(),
            start_of_variables: options.start_of_variables,
            env,
            state: Mutex::new(ContainerState {
                session: options.session,
                thread_id: options.thread_id,
                reference: options.reference,
                generation: 0,
                named_variables: options.named_variables.unwrap_or(0),
                indexed_variables: options.indexed_variables.unwrap_or(0),
                memory_reference: options.memory_reference,
                value: String::new(),
                value_changed: false,
                type_: options.type_,
                presentation_hint: options.presentation_hint,
                value_location_reference: options.value_location_reference,
                lazy_resolved_at: None,
            }),
            children: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn env(&self) -> &ContainerEnv {
        &self.env
    }

    pub fn session(&self) -> Option<Arc<dyn DebugSession>> {
        self.state.lock().session.clone()
    }

    pub fn thread_id(&self) -> Option<i64> {
        self.state.lock().thread_id
    }

    pub fn reference(&self) -> i64 {
        self.state.lock().reference
    }

    /// Reassigning the reference always drops the memoized children.
    pub fn set_reference(&self, reference: i64) {
        self.state.lock().assign_reference(reference);
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn named_variables(&self) -> i64 {
        self.state.lock().named_variables
    }

    pub fn indexed_variables(&self) -> i64 {
        self.state.lock().indexed_variables
    }

    pub fn start_of_variables(&self) -> i64 {
        self.start_of_variables
    }

    pub fn memory_reference(&self) -> Option<String> {
        self.state.lock().memory_reference.clone()
    }

    pub fn type_(&self) -> Option<String> {
        self.state.lock().type_.clone()
    }

    pub fn presentation_hint(&self) -> Option<VariablePresentationHint> {
        self.state.lock().presentation_hint.clone()
    }

    pub fn value_location_reference(&self) -> Option<i64> {
        self.state.lock().value_location_reference
    }

    pub fn value(&self) -> String {
        self.state.lock().value.clone()
    }

    pub fn set_value(&self, value: impl Into<String>) {
        let mut state = self.state.lock();
        self.set_value_locked(&mut state, value.into());
    }

    fn set_value_locked(&self, state: &mut ContainerState, value: String) {
        state.value_changed = self.env.diff_cache.record(&self.id, &value);
        state.value = value;
    }

    /// Whether the value differs from the one recorded for this id at the previous
    /// assignment.
    pub fn value_changed(&self) -> bool {
        self.state.lock().value_changed
    }

    pub fn has_children(&self) -> bool {
        let state = self.state.lock();
        state.reference > 0
            && !state
                .presentation_hint
                .as_ref()
                .is_some_and(VariablePresentationHint::is_lazy)
    }

    /// Children of this container, fetched once per reference assignment. Concurrent
    /// callers share the same in-flight fetch.
    pub async fn get_children(self: &Arc<Self>) -> Vec<Arc<Variable>> {
        let cell = self.children_cell();
        cell.get_or_init(|| self.fetch_children()).await.clone()
    }

    fn children_cell(&self) -> Arc<OnceCell<Vec<Arc<Variable>>>> {
        let generation = self.state.lock().generation;
        let mut slot = self.children.lock();
        match slot.as_ref() {
            Some(existing) if existing.generation == generation => existing.cell.clone(),
            _ => {
                let cell = Arc::new(OnceCell::new());
                *slot = Some(ChildrenSlot {
                    generation,
                    cell: cell.clone(),
                });
                cell
            }
        }
    }

    async fn fetch_children(self: &Arc<Self>) -> Vec<Arc<Variable>> {
        if !self.has_children() {
            return Vec::new();
        }
        let (session, named, indexed) = {
            let state = self.state.lock();
            (
                state.session.clone(),
                state.named_variables,
                state.indexed_variables,
            )
        };
        let Some(session) = session else {
            return Vec::new();
        };

        if indexed <= 0 {
            return self.fetch_variables(&session, None, None, None).await;
        }

        let mut children = if named > 0 {
            self.fetch_variables(&session, None, None, Some(VariablesFilter::Named))
                .await
        } else {
            Vec::new()
        };

        let page_size = self.env.page_size();
        let mut chunk_size = page_size;
        while indexed > chunk_size.saturating_mul(page_size) {
            chunk_size = chunk_size.saturating_mul(page_size);
        }

        if indexed > chunk_size {
            let chunks = (indexed + chunk_size - 1) / chunk_size;
            for i in 0..chunks {
                let start = self.start_of_variables + i * chunk_size;
                let count = chunk_size.min(indexed - i * chunk_size);
                children.push(Arc::new(Variable::virtual_range(self, start, count)));
            }
            return children;
        }

        let indexed_children = self
            .fetch_variables(
                &session,
                Some(self.start_of_variables),
                Some(indexed),
                Some(VariablesFilter::Indexed),
            )
            .await;
        children.extend(indexed_children);
        children
    }

    async fn fetch_variables(
        self: &Arc<Self>,
        session: &Arc<dyn DebugSession>,
        start: Option<i64>,
        count: Option<i64>,
        filter: Option<VariablesFilter>,
    ) -> Vec<Arc<Variable>> {
        let (reference, thread_id) = {
            let state = self.state.lock();
            (state.reference, state.thread_id)
        };

        let response = match session
            .variables(reference, thread_id, filter, start, count)
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return Vec::new(),
            Err(SessionError::Cancelled) => {
                tracing::trace!(target: TARGET, id = %self.id, "variables request cancelled");
                return Vec::new();
            }
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    id = %self.id,
                    reference,
                    error = %err,
                    "variables request failed"
                );
                return vec![Arc::new(Variable::error(self, err.to_string()))];
            }
        };

        let mut name_count: HashMap<String, usize> = HashMap::new();
        let variables: Vec<Arc<Variable>> = response
            .variables
            .into_iter()
            .map(|raw| {
                let seen = name_count.entry(raw.name.clone()).or_insert(0);
                let duplicate_index = if *seen > 0 {
                    seen.to_string()
                } else {
                    String::new()
                };
                *seen += 1;
                Arc::new(Variable::from_protocol(self, raw, &duplicate_index))
            })
            .collect();

        if session.auto_expand_lazy_variables() {
            join_all(
                variables
                    .iter()
                    .filter(|variable| {
                        variable
                            .presentation_hint()
                            .is_some_and(|hint| hint.is_lazy())
                    })
                    .map(|variable| variable.evaluate_lazy()),
            )
            .await;
        }

        variables
    }

    /// Materialize a lazy value with a single `variables` request on its own
    /// reference. Returns the adopted adapter variable, or `None` when nothing was
    /// adopted (no session, no reference, already resolved for the current
    /// reference, or the adapter did not answer with exactly one variable).
    pub async fn evaluate_lazy(&self) -> Option<protocol::Variable> {
        let (session, thread_id, reference, generation) = {
            let state = self.state.lock();
            if state.lazy_resolved_at == Some(state.generation) {
                return None;
            }
            (
                state.session.clone(),
                state.thread_id,
                state.reference,
                state.generation,
            )
        };
        let session = session?;
        if reference <= 0 {
            return None;
        }

        let response = match session
            .variables(reference, thread_id, None, None, None)
            .await
        {
            Ok(response) => response?,
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    id = %self.id,
                    error = %err,
                    "lazy variable evaluation failed"
                );
                return None;
            }
        };
        let [variable]: [protocol::Variable; 1] = response.variables.try_into().ok()?;

        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::trace!(target: TARGET, id = %self.id, "dropping stale lazy value");
            return None;
        }
        self.set_value_locked(&mut state, variable.value.clone());
        state.type_ = variable.type_.clone().or(state.type_.take());
        state.assign_reference(variable.variables_reference);
        state.named_variables = variable.named_variables.unwrap_or(0);
        state.indexed_variables = variable.indexed_variables.unwrap_or(0);
        state.memory_reference = variable.memory_reference.clone();
        state.presentation_hint = variable.presentation_hint.clone();
        state.value_location_reference = variable.value_location_reference;
        state.lazy_resolved_at = Some(state.generation);
        Some(variable)
    }

    /// Evaluate `expression` and adopt the result. Never fails: errors and a missing
    /// session or frame become the displayed value. Returns whether evaluation
    /// succeeded.
    pub(crate) async fn evaluate_expression(
        &self,
        expression: &str,
        session: Option<Arc<dyn DebugSession>>,
        frame_id: Option<i64>,
        context: EvaluateContext,
        keep_lazy: bool,
        location: Option<EvaluateLocation>,
    ) -> bool {
        let session = match session {
            Some(session) if frame_id.is_some() || context == EvaluateContext::Repl => session,
            _ => {
                let value = if context == EvaluateContext::Repl {
                    START_SESSION_FIRST
                } else {
                    DEFAULT_VALUE
                };
                let mut state = self.state.lock();
                self.set_value_locked(&mut state, value.to_string());
                state.assign_reference(0);
                return false;
            }
        };
        self.state.lock().session = Some(session.clone());

        match session
            .evaluate(expression, frame_id, context, location)
            .await
        {
            Ok(Some(response)) => {
                let lazy = response
                    .presentation_hint
                    .as_ref()
                    .is_some_and(VariablePresentationHint::is_lazy);
                {
                    let mut state = self.state.lock();
                    self.set_value_locked(&mut state, response.result);
                    state.assign_reference(response.variables_reference);
                    state.named_variables = response.named_variables.unwrap_or(0);
                    state.indexed_variables = response.indexed_variables.unwrap_or(0);
                    state.memory_reference = response.memory_reference;
                    if response.type_.is_some() {
                        state.type_ = response.type_;
                    }
                    state.presentation_hint = response.presentation_hint;
                    state.value_location_reference = response.value_location_reference;
                }
                if lazy && !keep_lazy {
                    self.evaluate_lazy().await;
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    id = %self.id,
                    context = context.as_str(),
                    error = %err,
                    "evaluate failed"
                );
                let mut state = self.state.lock();
                self.set_value_locked(&mut state, err.to_string());
                state.assign_reference(0);
                state.memory_reference = None;
                false
            }
        }
    }

    /// Adopt the body of a `setVariable`/`setExpression` response.
    pub(crate) fn handle_set_response(&self, response: Option<SetValueResponse>) {
        let Some(response) = response else {
            return;
        };
        let mut state = self.state.lock();
        self.set_value_locked(&mut state, response.value);
        if response.type_.is_some() {
            state.type_ = response.type_;
        }
        state.assign_reference(response.variables_reference.unwrap_or(0));
        state.named_variables = response.named_variables.unwrap_or(0);
        state.indexed_variables = response.indexed_variables.unwrap_or(0);
    }
}
