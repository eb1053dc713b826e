use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{
    ContainerEnv, ContainerOptions, EvaluateContext, ExpressionContainer, Variable, DEFAULT_VALUE,
};
use crate::model::DebugModelEvent;
use crate::protocol::EvaluateLocation;
use crate::session::DebugSession;
use crate::stack::StackFrame;

/// A user-entered expression (watch, REPL or hover), re-evaluated against a session
/// and stack frame on demand.
#[derive(Debug)]
pub struct Expression {
    container: Arc<ExpressionContainer>,
    name: Mutex<String>,
    available: AtomicBool,
    events: Option<broadcast::Sender<DebugModelEvent>>,
}

impl Deref for Expression {
    type Target = ExpressionContainer;

    fn deref(&self) -> &ExpressionContainer {
        &self.container
    }
}

impl Expression {
    pub fn new(name: impl Into<String>, env: ContainerEnv) -> Self {
        Self::with_id(name, uuid::Uuid::new_v4().to_string(), env, None)
    }

    pub(crate) fn with_id(
        name: impl Into<String>,
        id: String,
        env: ContainerEnv,
        events: Option<broadcast::Sender<DebugModelEvent>>,
    ) -> Self {
        let name = name.into();
        let container = Arc::new(ExpressionContainer::new(id, env, ContainerOptions::default()));
        // An unnamed expression is a REPL placeholder and starts without a value.
        if !name.is_empty() {
            container.set_value(DEFAULT_VALUE);
        }
        Self {
            container,
            name: Mutex::new(name),
            available: AtomicBool::new(false),
            events,
        }
    }

    pub fn container(&self) -> &Arc<ExpressionContainer> {
        &self.container
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub async fn get_children(&self) -> Vec<Arc<Variable>> {
        self.container.get_children().await
    }

    /// Evaluate against `session` in `frame`. A value-changed event is broadcast when
    /// the expression leaves its placeholder value or its value changed.
    pub async fn evaluate(
        &self,
        session: Option<Arc<dyn DebugSession>>,
        frame: Option<&StackFrame>,
        context: EvaluateContext,
        keep_lazy: bool,
        location: Option<EvaluateLocation>,
    ) {
        let had_default_value = self.container.value() == DEFAULT_VALUE;
        let name = self.name();
        let available = self
            .container
            .evaluate_expression(
                &name,
                session,
                frame.map(StackFrame::frame_id),
                context,
                keep_lazy,
                location,
            )
            .await;
        self.available.store(available, Ordering::Relaxed);

        if had_default_value || self.container.value_changed() {
            if let Some(events) = &self.events {
                let _ = events.send(DebugModelEvent::WatchExpressionValueChanged(
                    self.container.id().to_string(),
                ));
            }
        }
    }

    pub async fn set_expression(&self, value: &str, frame: &StackFrame) {
        let Some(session) = self.container.session() else {
            return;
        };
        let name = self.name();
        match session.set_expression(frame.frame_id(), &name, value).await {
            Ok(response) => self.container.handle_set_response(response),
            Err(err) => tracing::debug!(
                target: "nova.debug_model",
                expression = %name,
                error = %err,
                "setExpression failed"
            ),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.name(), self.container.value())
    }
}
