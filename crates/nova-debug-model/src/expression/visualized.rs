use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Variable;
use crate::session::SessionId;

/// One node of a tree produced by a debug visualizer extension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationTreeItem {
    pub id: i64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub collapsible: bool,
    #[serde(default)]
    pub editable: bool,
}

/// Host of visualizer trees; the model only forwards to it.
#[async_trait]
pub trait TreeVisualizer: Send + Sync {
    async fn visualized_children(
        &self,
        session: Option<&SessionId>,
        tree_id: &str,
        element_id: i64,
    ) -> Vec<VisualizationTreeItem>;

    async fn edit_tree_item(
        &self,
        tree_id: &str,
        item: &VisualizationTreeItem,
        new_value: &str,
    ) -> Option<VisualizationTreeItem>;
}

/// A value rendered by a visualizer tree instead of the adapter's variables.
pub struct VisualizedExpression {
    id: String,
    session: Option<SessionId>,
    visualizer: Arc<dyn TreeVisualizer>,
    tree_id: String,
    item: Mutex<VisualizationTreeItem>,
    original: Option<Arc<Variable>>,
}

impl std::fmt::Debug for VisualizedExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizedExpression")
            .field("id", &self.id)
            .field("tree_id", &self.tree_id)
            .field("item", &*self.item.lock())
            .finish_non_exhaustive()
    }
}

impl VisualizedExpression {
    pub fn new(
        session: Option<SessionId>,
        visualizer: Arc<dyn TreeVisualizer>,
        tree_id: impl Into<String>,
        item: VisualizationTreeItem,
        original: Option<Arc<Variable>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session,
            visualizer,
            tree_id: tree_id.into(),
            item: Mutex::new(item),
            original,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn tree_item(&self) -> VisualizationTreeItem {
        self.item.lock().clone()
    }

    /// The adapter variable this visualization replaced, if any.
    pub fn original(&self) -> Option<&Arc<Variable>> {
        self.original.as_ref()
    }

    pub fn name(&self) -> String {
        self.item.lock().label.clone()
    }

    pub fn value(&self) -> String {
        self.item.lock().description.clone().unwrap_or_default()
    }

    pub fn has_children(&self) -> bool {
        self.item.lock().collapsible
    }

    /// Visualized values are always resolved.
    pub async fn evaluate_lazy(&self) {}

    pub async fn get_children(&self) -> Vec<Arc<VisualizedExpression>> {
        let element_id = self.item.lock().id;
        self.visualizer
            .visualized_children(self.session.as_ref(), &self.tree_id, element_id)
            .await
            .into_iter()
            .map(|item| {
                Arc::new(VisualizedExpression::new(
                    self.session.clone(),
                    self.visualizer.clone(),
                    self.tree_id.clone(),
                    item,
                    None,
                ))
            })
            .collect()
    }

    /// Ask the visualizer to edit the node; returns whether it accepted the value.
    pub async fn edit(&self, new_value: &str) -> bool {
        let item = self.tree_item();
        match self
            .visualizer
            .edit_tree_item(&self.tree_id, &item, new_value)
            .await
        {
            Some(updated) => {
                *self.item.lock() = updated;
                true
            }
            None => false,
        }
    }
}
