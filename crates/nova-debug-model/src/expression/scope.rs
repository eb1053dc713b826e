use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::{ContainerEnv, ContainerOptions, ExpressionContainer, Variable};
use crate::protocol;
use crate::session::DebugSession;
use crate::source::SourceRange;

/// A named group of variables of one stack frame (locals, globals, registers...).
#[derive(Debug)]
pub struct Scope {
    container: Arc<ExpressionContainer>,
    name: String,
    expensive: bool,
    range: Option<SourceRange>,
    error: bool,
}

impl Deref for Scope {
    type Target = ExpressionContainer;

    fn deref(&self) -> &ExpressionContainer {
        &self.container
    }
}

impl Scope {
    pub(crate) fn new(
        session: Arc<dyn DebugSession>,
        thread_id: i64,
        env: ContainerEnv,
        hash: i32,
        raw: &protocol::Scope,
    ) -> Self {
        let options = ContainerOptions {
            session: Some(session),
            thread_id: Some(thread_id),
            reference: raw.variables_reference,
            named_variables: raw.named_variables,
            indexed_variables: raw.indexed_variables,
            ..ContainerOptions::default()
        };
        let range = match (raw.line, raw.column, raw.end_line, raw.end_column) {
            (Some(line), Some(column), Some(end_line), Some(end_column)) => {
                Some(SourceRange::new(line, column, end_line, end_column))
            }
            _ => None,
        };
        Self {
            container: Arc::new(ExpressionContainer::new(
                format!("scope:{}:{}", raw.name, hash),
                env,
                options,
            )),
            name: raw.name.clone(),
            expensive: raw.expensive,
            range,
            error: false,
        }
    }

    /// Stand-in scope whose name is the error message of a failed `scopes` request.
    pub(crate) fn error(
        session: Arc<dyn DebugSession>,
        thread_id: i64,
        env: ContainerEnv,
        message: String,
    ) -> Self {
        let options = ContainerOptions {
            session: Some(session),
            thread_id: Some(thread_id),
            ..ContainerOptions::default()
        };
        Self {
            container: Arc::new(ExpressionContainer::new(
                format!("scope:{message}:0"),
                env,
                options,
            )),
            name: message,
            expensive: false,
            range: None,
            error: true,
        }
    }

    pub fn container(&self) -> &Arc<ExpressionContainer> {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expensive(&self) -> bool {
        self.expensive
    }

    pub fn range(&self) -> Option<SourceRange> {
        self.range
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub async fn get_children(&self) -> Vec<Arc<Variable>> {
        self.container.get_children().await
    }

    pub fn to_debug_protocol_object(&self) -> protocol::Scope {
        protocol::Scope {
            name: self.name.clone(),
            presentation_hint: None,
            variables_reference: self.reference(),
            named_variables: None,
            indexed_variables: None,
            expensive: self.expensive,
            source: None,
            line: None,
            column: None,
            end_line: None,
            end_column: None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 32-bit string hash seeded with a previous hash, so collisions can be resolved by
/// re-hashing with the colliding value as seed.
pub(crate) fn string_hash(s: &str, seed: i32) -> i32 {
    fn number_hash(value: i32, seed: i32) -> i32 {
        (seed << 5).wrapping_sub(seed).wrapping_add(value)
    }
    let mut hash = number_hash(149_417, seed);
    for unit in s.encode_utf16() {
        hash = number_hash(i32::from(unit), hash);
    }
    hash
}
