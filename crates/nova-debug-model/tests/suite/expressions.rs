use std::sync::Arc;

use nova_debug_model::expression::{
    ContainerEnv, TreeVisualizer, VisualizationTreeItem, VisualizedExpression, DEFAULT_VALUE,
};
use nova_debug_model::mock::{variable, MockCall, MockDebugSession};
use nova_debug_model::protocol::{
    Capabilities, EvaluateResponse, VariablePresentationHint, VariablesFilter,
};
use nova_debug_model::{
    DebugModel, DebugModelEvent, DebugSession, DiffCache, EvaluateContext, Expression, SessionId,
    Variable,
};
use pretty_assertions::assert_eq;

use crate::harness::{drain, mock_session, mock_session_with};

fn container_result(result: &str, reference: i64, indexed: Option<i64>) -> EvaluateResponse {
    EvaluateResponse {
        result: result.to_string(),
        variables_reference: reference,
        indexed_variables: indexed,
        ..EvaluateResponse::default()
    }
}

fn variables_calls(mock: &MockDebugSession, wanted: i64) -> usize {
    mock.calls()
        .iter()
        .filter(|call| matches!(call, MockCall::Variables { reference, .. } if *reference == wanted))
        .count()
}

async fn evaluate_in_repl(expression: &Expression, mock: &Arc<MockDebugSession>) {
    let session: Arc<dyn DebugSession> = mock.clone();
    expression
        .evaluate(Some(session), None, EvaluateContext::Repl, false, None)
        .await;
}

async fn leaf_count(children: Vec<Arc<Variable>>) -> usize {
    let mut count = 0;
    let mut pending = children;
    while let Some(child) = pending.pop() {
        if child.has_children() {
            pending.extend(child.get_children().await);
        } else {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn large_arrays_are_split_into_range_nodes() {
    let mock = mock_session("s1");
    mock.set_evaluation("arr", Ok(container_result("int[250]", 7, Some(250))));
    mock.generate_indexed_variables(7, 250);

    let arr = Expression::new("arr", ContainerEnv::default());
    evaluate_in_repl(&arr, &mock).await;
    assert_eq!(arr.value(), "int[250]");

    let children = arr.get_children().await;
    let names: Vec<&str> = children.iter().map(|child| child.name()).collect();
    assert_eq!(names, vec!["[0..99]", "[100..199]", "[200..249]"]);
    assert_eq!(
        children[0].presentation_hint(),
        Some(VariablePresentationHint::virtual_node())
    );

    let last = children[2].get_children().await;
    assert_eq!(last.len(), 50);
    assert_eq!(last[0].name(), "[200]");
    assert!(mock.calls().contains(&MockCall::Variables {
        reference: 7,
        filter: Some(VariablesFilter::Indexed),
        start: Some(200),
        count: Some(50),
    }));

    assert_eq!(leaf_count(children).await, 250);
}

#[tokio::test]
async fn chunk_size_grows_by_page_size() {
    let mock = mock_session("s1");
    mock.set_evaluation("big", Ok(container_result("long[25000]", 3, Some(25_000))));

    let big = Expression::new("big", ContainerEnv::default());
    evaluate_in_repl(&big, &mock).await;

    let children = big.get_children().await;
    let names: Vec<&str> = children.iter().map(|child| child.name()).collect();
    assert_eq!(names, vec!["[0..9999]", "[10000..19999]", "[20000..24999]"]);

    let nested = children[1].get_children().await;
    assert_eq!(nested.len(), 100);
    assert_eq!(nested[0].name(), "[10000..10099]");
    assert_eq!(variables_calls(&mock, 3), 0, "range nodes are synthesized locally");
}

#[tokio::test]
async fn undersized_page_size_still_chunks() {
    let mock = mock_session("s1");
    mock.set_evaluation("arr", Ok(container_result("int[5]", 3, Some(5))));

    let arr = Expression::new("arr", ContainerEnv::new(DiffCache::new(), 1));
    evaluate_in_repl(&arr, &mock).await;

    let children = arr.get_children().await;
    let names: Vec<&str> = children.iter().map(|child| child.name()).collect();
    assert_eq!(names, vec!["[0..3]", "[4..4]"]);
}

#[tokio::test]
async fn children_are_memoized_until_the_reference_changes() {
    let mock = mock_session("s1");
    mock.set_evaluation("obj", Ok(container_result("Point", 5, None)));
    mock.set_named_variables(5, vec![variable("x", "1", 0), variable("y", "2", 0)]);

    let obj = Expression::new("obj", ContainerEnv::default());
    evaluate_in_repl(&obj, &mock).await;

    let first = obj.get_children().await;
    let again = obj.get_children().await;
    assert!(Arc::ptr_eq(&first[0], &again[0]));
    assert_eq!(variables_calls(&mock, 5), 1);

    let generation = obj.generation();
    obj.set_reference(5);
    assert_eq!(obj.generation(), generation + 1);
    let refreshed = obj.get_children().await;
    assert!(!Arc::ptr_eq(&first[0], &refreshed[0]));
    assert_eq!(variables_calls(&mock, 5), 2);
}

#[tokio::test]
async fn duplicate_names_get_distinct_ids() {
    let mock = mock_session("s1");
    mock.set_evaluation("this", Ok(container_result("Derived", 5, None)));
    mock.set_named_variables(
        5,
        vec![variable("value", "1", 0), variable("value", "2", 0), variable("other", "3", 0)],
    );

    let this = Expression::new("this", ContainerEnv::default());
    evaluate_in_repl(&this, &mock).await;
    let children = this.get_children().await;

    let ids: Vec<&str> = children.iter().map(|child| child.id()).collect();
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert!(ids[0].ends_with(":value:"), "{}", ids[0]);
    assert!(ids[1].ends_with(":value:1"), "{}", ids[1]);
    assert_eq!(children[1].to_string(), "value: 2");
}

#[tokio::test]
async fn lazy_values_are_resolved_once_per_reference() {
    let mock = mock_session("s1");
    mock.set_evaluation("obj", Ok(container_result("Holder", 5, None)));
    let mut lazy = variable("cached", "(...)", 9);
    lazy.presentation_hint = Some(VariablePresentationHint {
        lazy: Some(true),
        ..VariablePresentationHint::default()
    });
    mock.set_named_variables(5, vec![lazy]);
    let mut resolved = variable("cached", "42", 0);
    resolved.evaluate_name = Some("obj.cached".to_string());
    mock.set_named_variables(9, vec![resolved]);

    let obj = Expression::new("obj", ContainerEnv::default());
    evaluate_in_repl(&obj, &mock).await;
    let children = obj.get_children().await;
    let cached = &children[0];
    assert!(!cached.has_children(), "lazy values hide their children");

    cached.evaluate_lazy().await;
    cached.evaluate_lazy().await;

    assert_eq!(variables_calls(&mock, 9), 1);
    assert_eq!(cached.value(), "42");
    assert_eq!(cached.evaluate_name().as_deref(), Some("obj.cached"));
    assert_eq!(cached.reference(), 0);
}

#[tokio::test]
async fn lazy_children_are_expanded_eagerly_when_the_session_asks() {
    let mock = mock_session("s1");
    mock.set_auto_expand_lazy_variables(true);
    mock.set_evaluation("obj", Ok(container_result("Holder", 5, None)));
    let mut lazy = variable("cached", "(...)", 9);
    lazy.presentation_hint = Some(VariablePresentationHint {
        lazy: Some(true),
        ..VariablePresentationHint::default()
    });
    mock.set_named_variables(5, vec![lazy]);
    mock.set_named_variables(9, vec![variable("cached", "42", 0)]);

    let obj = Expression::new("obj", ContainerEnv::default());
    evaluate_in_repl(&obj, &mock).await;
    let children = obj.get_children().await;
    assert_eq!(children[0].value(), "42");
}

#[tokio::test]
async fn evaluating_without_a_session_never_reaches_an_adapter() {
    let mock = mock_session("s1");
    let watch = Expression::new("count", ContainerEnv::default());

    watch
        .evaluate(None, None, EvaluateContext::Watch, false, None)
        .await;
    assert_eq!(watch.value(), DEFAULT_VALUE);
    assert!(!watch.available());

    let session: Arc<dyn DebugSession> = mock.clone();
    watch
        .evaluate(Some(session), None, EvaluateContext::Watch, false, None)
        .await;
    assert_eq!(watch.value(), DEFAULT_VALUE);
    assert!(mock.calls().is_empty(), "watch evaluation needs a frame");

    let repl = Expression::new("1 + 1", ContainerEnv::default());
    repl.evaluate(None, None, EvaluateContext::Repl, false, None)
        .await;
    assert_eq!(repl.value(), "Please start a debug session to evaluate expressions");
}

#[tokio::test]
async fn failed_evaluation_shows_the_adapter_message() {
    let mock = mock_session("s1");
    mock.set_evaluation("missing", Err("missing is not defined".to_string()));

    let expression = Expression::new("missing", ContainerEnv::default());
    evaluate_in_repl(&expression, &mock).await;
    assert_eq!(expression.value(), "missing is not defined");
    assert!(!expression.available());
    assert!(!expression.has_children());
}

#[tokio::test]
async fn value_changes_are_tracked_per_model() {
    let mock = mock_session("s1");
    let diff_cache = DiffCache::new();
    let env = ContainerEnv::new(diff_cache.clone(), 100);
    let expression = Expression::new("counter", env);

    mock.set_evaluation("counter", Ok(container_result("1", 0, None)));
    evaluate_in_repl(&expression, &mock).await;
    assert!(!expression.value_changed(), "first value is not a change");

    evaluate_in_repl(&expression, &mock).await;
    assert!(!expression.value_changed());

    mock.set_evaluation("counter", Ok(container_result("2", 0, None)));
    evaluate_in_repl(&expression, &mock).await;
    assert!(expression.value_changed());

    let other = DebugModel::default();
    assert!(other.diff_cache().is_empty());
    assert!(!diff_cache.is_empty());
}

#[tokio::test]
async fn watch_expressions_announce_value_changes() {
    let mock = mock_session("s1");
    mock.set_evaluation("count", Ok(container_result("1", 0, None)));
    let model = DebugModel::default();
    let watch = model.add_watch_expression(Some("count"));
    let mut events = model.subscribe();

    evaluate_in_repl(&watch, &mock).await;
    assert_eq!(
        drain(&mut events),
        vec![DebugModelEvent::WatchExpressionValueChanged(watch.id().to_string())]
    );

    evaluate_in_repl(&watch, &mock).await;
    assert!(drain(&mut events).is_empty(), "unchanged value is not announced");

    mock.set_evaluation("count", Ok(container_result("2", 0, None)));
    evaluate_in_repl(&watch, &mock).await;
    assert_eq!(drain(&mut events).len(), 1);
}

#[tokio::test]
async fn variables_errors_become_an_error_child() {
    let mock = mock_session("s1");
    mock.set_evaluation("obj", Ok(container_result("Object", 5, None)));
    mock.fail_variables(5, "target is running");

    let obj = Expression::new("obj", ContainerEnv::default());
    evaluate_in_repl(&obj, &mock).await;
    let children = obj.get_children().await;
    assert_eq!(children.len(), 1);
    assert!(!children[0].available());
    assert_eq!(children[0].value(), "target is running");
}

#[tokio::test]
async fn set_variable_falls_back_to_set_expression() {
    let mock = mock_session_with(
        "s1",
        Capabilities {
            supports_set_expression: true,
            ..Capabilities::default()
        },
    );
    mock.set_evaluation("p", Ok(container_result("Point", 5, None)));
    let mut x = variable("x", "1", 0);
    x.evaluate_name = Some("p.x".to_string());
    mock.set_named_variables(5, vec![x]);

    let p = Expression::new("p", ContainerEnv::default());
    evaluate_in_repl(&p, &mock).await;
    let children = p.get_children().await;
    children[0].set_variable("7", 11).await;

    assert!(mock.calls().contains(&MockCall::SetExpression {
        frame_id: 11,
        expression: "p.x".to_string(),
        value: "7".to_string(),
    }));
    assert_eq!(children[0].value(), "7");
    assert_eq!(children[0].error_message(), None);
}

#[tokio::test]
async fn failed_set_variable_is_recorded_on_the_variable() {
    let mock = mock_session_with(
        "s1",
        Capabilities {
            supports_set_variable: true,
            ..Capabilities::default()
        },
    );
    mock.set_evaluation("p", Ok(container_result("Point", 5, None)));
    mock.set_named_variables(5, vec![variable("x", "1", 0)]);
    mock.set_set_variable_response("x", Err("x is final".to_string()));

    let p = Expression::new("p", ContainerEnv::default());
    evaluate_in_repl(&p, &mock).await;
    let children = p.get_children().await;
    children[0].set_variable("7", 11).await;

    assert!(mock.calls().contains(&MockCall::SetVariable {
        reference: 5,
        name: "x".to_string(),
        value: "7".to_string(),
    }));
    assert_eq!(children[0].value(), "1");
    assert_eq!(children[0].error_message().as_deref(), Some("x is final"));

    mock.set_set_variable_response("x", Ok(Default::default()));
    children[0].set_variable("8", 11).await;
    assert_eq!(children[0].error_message(), None);
}

#[tokio::test]
async fn set_variable_needs_a_live_container() {
    let mock = mock_session_with(
        "s1",
        Capabilities {
            supports_set_variable: true,
            ..Capabilities::default()
        },
    );
    mock.set_evaluation("p", Ok(container_result("Point", 5, None)));
    mock.set_named_variables(5, vec![variable("x", "1", 0)]);

    let p = Expression::new("p", ContainerEnv::default());
    evaluate_in_repl(&p, &mock).await;
    let x = p.get_children().await[0].clone();
    drop(p);

    assert!(x.parent().is_none());
    x.set_variable("7", 11).await;
    assert!(!mock
        .calls()
        .iter()
        .any(|call| matches!(call, MockCall::SetVariable { .. })));
    assert_eq!(
        x.error_message().as_deref(),
        Some("The variable's container is no longer available")
    );
}

struct TableVisualizer;

#[async_trait::async_trait]
impl TreeVisualizer for TableVisualizer {
    async fn visualized_children(
        &self,
        _session: Option<&SessionId>,
        _tree_id: &str,
        element_id: i64,
    ) -> Vec<VisualizationTreeItem> {
        (1..=2)
            .map(|row| VisualizationTreeItem {
                id: element_id * 10 + row,
                label: format!("row {row}"),
                description: Some(format!("{}", row * 100)),
                collapsible: false,
                editable: true,
            })
            .collect()
    }

    async fn edit_tree_item(
        &self,
        _tree_id: &str,
        item: &VisualizationTreeItem,
        new_value: &str,
    ) -> Option<VisualizationTreeItem> {
        item.editable.then(|| VisualizationTreeItem {
            description: Some(new_value.to_string()),
            ..item.clone()
        })
    }
}

#[tokio::test]
async fn visualized_values_delegate_to_the_visualizer() {
    let root = VisualizedExpression::new(
        Some(SessionId::new("s1")),
        Arc::new(TableVisualizer),
        "table",
        VisualizationTreeItem {
            id: 1,
            label: "rows".to_string(),
            description: None,
            collapsible: true,
            editable: false,
        },
        None,
    );
    assert!(root.has_children());
    assert_eq!(root.value(), "");
    assert!(!root.edit("x").await);

    let rows = root.get_children().await;
    let labels: Vec<String> = rows.iter().map(|row| row.name()).collect();
    assert_eq!(labels, vec!["row 1", "row 2"]);
    assert_eq!(rows[1].tree_item().id, 12);
    assert_eq!(rows[0].tree_id(), "table");

    assert!(rows[0].edit("150").await);
    assert_eq!(rows[0].value(), "150");
}
