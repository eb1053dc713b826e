use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{ContainerOptions, ExpressionContainer};
use crate::protocol::{self, VariablePresentationHint};

const PARENT_RELEASED: &str = "The variable's container is no longer available";

/// A named child of a container.
///
/// Holds a weak link to the container it was fetched from; `setVariable` needs that
/// container's reference.
#[derive(Debug)]
pub struct Variable {
    container: Arc<ExpressionContainer>,
    parent: Weak<ExpressionContainer>,
    name: String,
    evaluate_name: Mutex<Option<String>>,
    available: bool,
    declaration_location_reference: Option<i64>,
    error_message: Mutex<Option<String>>,
}

impl Deref for Variable {
    type Target = ExpressionContainer;

    fn deref(&self) -> &ExpressionContainer {
        &self.container
    }
}

impl Variable {
    fn with_container(
        parent: &Arc<ExpressionContainer>,
        name: String,
        duplicate_index: &str,
        options: ContainerOptions,
    ) -> Self {
        let id = format!("variable:{}:{}:{}", parent.id(), name, duplicate_index);
        Self {
            container: Arc::new(ExpressionContainer::new(id, parent.env().clone(), options)),
            parent: Arc::downgrade(parent),
            name,
            evaluate_name: Mutex::new(None),
            available: true,
            declaration_location_reference: None,
            error_message: Mutex::new(None),
        }
    }

    pub(crate) fn from_protocol(
        parent: &Arc<ExpressionContainer>,
        raw: protocol::Variable,
        duplicate_index: &str,
    ) -> Self {
        let options = ContainerOptions {
            session: parent.session(),
            thread_id: parent.thread_id(),
            reference: raw.variables_reference,
            named_variables: raw.named_variables,
            indexed_variables: raw.indexed_variables,
            start_of_variables: 0,
            memory_reference: raw.memory_reference,
            presentation_hint: raw.presentation_hint,
            type_: raw.type_,
            value_location_reference: raw.value_location_reference,
        };
        let mut variable = Self::with_container(parent, raw.name, duplicate_index, options);
        variable.container.set_value(raw.value);
        *variable.evaluate_name.get_mut() = raw.evaluate_name;
        variable.declaration_location_reference = raw.declaration_location_reference;
        variable
    }

    /// Synthetic `[start..end]` node covering `count` indexed children of `parent`.
    pub(crate) fn virtual_range(parent: &Arc<ExpressionContainer>, start: i64, count: i64) -> Self {
        let options = ContainerOptions {
            session: parent.session(),
            thread_id: parent.thread_id(),
            reference: parent.reference(),
            indexed_variables: Some(count),
            start_of_variables: start,
            presentation_hint: Some(VariablePresentationHint::virtual_node()),
            ..ContainerOptions::default()
        };
        let name = format!("[{}..{}]", start, start + count - 1);
        let variable = Self::with_container(parent, name, "", options);
        variable.container.set_value("");
        variable
    }

    /// Placeholder child carrying an adapter error message as its value.
    pub(crate) fn error(parent: &Arc<ExpressionContainer>, message: String) -> Self {
        let options = ContainerOptions {
            session: parent.session(),
            thread_id: parent.thread_id(),
            presentation_hint: Some(VariablePresentationHint::virtual_node()),
            ..ContainerOptions::default()
        };
        let mut variable = Self::with_container(parent, String::new(), "", options);
        variable.available = false;
        variable.container.set_value(message);
        variable
    }

    pub fn container(&self) -> &Arc<ExpressionContainer> {
        &self.container
    }

    pub fn parent(&self) -> Option<Arc<ExpressionContainer>> {
        self.parent.upgrade()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate_name(&self) -> Option<String> {
        self.evaluate_name.lock().clone()
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn declaration_location_reference(&self) -> Option<i64> {
        self.declaration_location_reference
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().clone()
    }

    pub async fn get_children(&self) -> Vec<Arc<Variable>> {
        self.container.get_children().await
    }

    /// Resolve a lazy value; also adopts the adapter's `evaluateName`.
    pub async fn evaluate_lazy(&self) {
        if let Some(raw) = self.container.evaluate_lazy().await {
            *self.evaluate_name.lock() = raw.evaluate_name;
        }
    }

    /// Assign a new value through the adapter.
    ///
    /// Adapters that only implement `setExpression` are driven through it when the
    /// variable has an evaluate name. Failures are recorded in
    /// [`Variable::error_message`].
    pub async fn set_variable(&self, value: &str, frame_id: i64) {
        let Some(session) = self.container.session() else {
            return;
        };
        let capabilities = session.capabilities();
        if capabilities.supports_set_expression
            && !capabilities.supports_set_variable
            && self.evaluate_name().is_some()
        {
            self.set_expression(value, frame_id).await;
            return;
        }

        let Some(parent) = self.parent() else {
            *self.error_message.lock() = Some(PARENT_RELEASED.to_string());
            return;
        };
        match session
            .set_variable(parent.reference(), &self.name, value)
            .await
        {
            Ok(response) => {
                *self.error_message.lock() = None;
                self.container.handle_set_response(response);
            }
            Err(err) => *self.error_message.lock() = Some(err.to_string()),
        }
    }

    pub async fn set_expression(&self, value: &str, frame_id: i64) {
        let Some(session) = self.container.session() else {
            return;
        };
        let Some(evaluate_name) = self.evaluate_name() else {
            return;
        };
        match session.set_expression(frame_id, &evaluate_name, value).await {
            Ok(response) => {
                *self.error_message.lock() = None;
                self.container.handle_set_response(response);
            }
            Err(err) => *self.error_message.lock() = Some(err.to_string()),
        }
    }

    pub fn to_debug_protocol_object(&self) -> protocol::Variable {
        protocol::Variable {
            name: self.name.clone(),
            value: self.value(),
            type_: self.type_(),
            evaluate_name: self.evaluate_name(),
            variables_reference: self.reference(),
            memory_reference: self.memory_reference(),
            ..protocol::Variable::default()
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.value())
        } else {
            write!(f, "{}: {}", self.name, self.value())
        }
    }
}
