use std::collections::HashMap;

use nova_debug_model::breakpoints::{
    BreakpointOptions, BreakpointUpdate, DataBreakpointOptions, DataBreakpointSource,
    InstructionBreakpointOptions,
};
use nova_debug_model::mock::{MockCall, MockDebugSession};
use nova_debug_model::protocol::{
    self, BreakpointMode, BreakpointModeApplicability, Capabilities, DataBreakpointAccessType,
    ExceptionBreakpointsFilter,
};
use nova_debug_model::{
    BreakpointFilter, BreakpointsChangeEvent, DebugModel, DebugModelEvent, SessionId,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::harness::{drain, file_uri};

fn line(line_number: i64) -> BreakpointOptions {
    BreakpointOptions {
        line_number,
        ..BreakpointOptions::default()
    }
}

fn instruction(reference: &str, offset: i64) -> InstructionBreakpointOptions {
    InstructionBreakpointOptions {
        instruction_reference: reference.to_string(),
        offset,
        ..InstructionBreakpointOptions::default()
    }
}

fn address_breakpoint(can_persist: bool) -> DataBreakpointOptions {
    DataBreakpointOptions {
        id: None,
        description: "buffer[0..4]".to_string(),
        src: DataBreakpointSource::Address {
            address: "0x1000".to_string(),
            bytes: 4,
        },
        can_persist,
        access_types: None,
        access_type: DataBreakpointAccessType::Write,
        enabled: None,
        condition: None,
        hit_condition: None,
        mode: None,
        mode_label: None,
    }
}

#[test]
fn session_reports_fan_out_to_every_kind_with_one_event() {
    let model = DebugModel::default();
    let source = model.add_breakpoints(&file_uri("/src/Main.java"), vec![line(10)], true);
    let function = model.add_function_breakpoint("main", None);
    let mut events = model.subscribe();

    let session = SessionId::new("s1");
    let capabilities = Capabilities {
        supports_function_breakpoints: true,
        ..Capabilities::default()
    };
    let reports = HashMap::from([
        (
            source[0].id().to_string(),
            protocol::Breakpoint {
                id: Some(1),
                verified: true,
                line: Some(12),
                ..protocol::Breakpoint::default()
            },
        ),
        (
            function.id().to_string(),
            protocol::Breakpoint {
                id: Some(2),
                verified: true,
                ..protocol::Breakpoint::default()
            },
        ),
    ]);
    model.set_breakpoint_session_data(&session, &capabilities, Some(&reports));

    assert_eq!(
        drain(&mut events),
        vec![DebugModelEvent::BreakpointsChanged(
            BreakpointsChangeEvent::session_only()
        )]
    );
    let stored = model.get_breakpoints(&BreakpointFilter::default());
    assert!(stored[0].verified());
    assert_eq!(stored[0].line_number(), 12);
    assert_eq!(stored[0].session_agnostic_data(), (10, None));
    assert!(model.get_function_breakpoints()[0].base.verified());
    assert_eq!(
        model
            .get_debug_protocol_breakpoint(function.id(), &session)
            .and_then(|bp| bp.id),
        Some(2)
    );

    model.set_breakpoint_session_data(&session, &capabilities, None);
    let stored = model.get_breakpoints(&BreakpointFilter::default());
    assert!(!stored[0].verified());
    assert_eq!(stored[0].line_number(), 10);
    assert!(model
        .get_debug_protocol_breakpoint(function.id(), &session)
        .is_none());
}

#[test]
fn unsupported_settings_explain_themselves() {
    let model = DebugModel::default();
    let added = model.add_breakpoints(
        &file_uri("/src/Main.java"),
        vec![BreakpointOptions {
            line_number: 3,
            log_message: Some("x = {x}".to_string()),
            ..BreakpointOptions::default()
        }],
        false,
    );
    let id = added[0].id().to_string();
    let reports = HashMap::from([(
        id.clone(),
        protocol::Breakpoint {
            verified: true,
            ..protocol::Breakpoint::default()
        },
    )]);
    model.set_breakpoint_session_data(&SessionId::new("s1"), &Capabilities::default(), Some(&reports));

    assert_eq!(
        model.breakpoint_message(&id).as_deref(),
        Some("Logpoints not supported by this debug type")
    );
}

#[test]
fn instruction_breakpoints_are_removed_by_reference_and_offset() {
    let model = DebugModel::default();
    model.add_instruction_breakpoint(instruction("0x100", 0));
    model.add_instruction_breakpoint(instruction("0x100", 4));
    model.add_instruction_breakpoint(instruction("0x200", 0));

    model.remove_instruction_breakpoints(Some("0x100"), Some(4));
    let remaining: Vec<(String, i64)> = model
        .get_instruction_breakpoints()
        .iter()
        .map(|bp| (bp.instruction_reference.clone(), bp.offset))
        .collect();
    assert_eq!(
        remaining,
        vec![("0x100".to_string(), 0), ("0x200".to_string(), 0)]
    );

    model.remove_instruction_breakpoints(Some("0x100"), None);
    assert_eq!(model.get_instruction_breakpoints().len(), 1);

    model.remove_instruction_breakpoints(None, None);
    assert!(model.get_instruction_breakpoints().is_empty());
}

#[test]
fn updates_resort_and_report_changed_ids() {
    let model = DebugModel::default();
    let uri = file_uri("/src/Main.java");
    let added = model.add_breakpoints(&uri, vec![line(5), line(20)], false);
    let mut events = model.subscribe();

    model.update_breakpoints(HashMap::from([(
        added[1].id().to_string(),
        BreakpointUpdate {
            line_number: Some(1),
            condition: Some(Some("i > 3".to_string())),
            ..BreakpointUpdate::default()
        },
    )]));

    let lines: Vec<i64> = model
        .get_breakpoints(&BreakpointFilter::default())
        .iter()
        .map(|bp| bp.line_number())
        .collect();
    assert_eq!(lines, vec![1, 5]);
    assert_eq!(
        drain(&mut events),
        vec![DebugModelEvent::BreakpointsChanged(
            BreakpointsChangeEvent::changed(vec![added[1].id().to_string()])
        )]
    );

    let on_line_one = model.get_breakpoints(&BreakpointFilter {
        original_uri: Some(uri),
        line_number: Some(1),
        ..BreakpointFilter::default()
    });
    assert_eq!(on_line_one[0].base.condition.as_deref(), Some("i > 3"));
}

#[test]
fn enable_or_disable_all_leaves_exception_filters_alone() {
    let model = DebugModel::default();
    model.add_breakpoints(&file_uri("/src/Main.java"), vec![line(5)], false);
    model.add_function_breakpoint("main", None);
    model.set_exception_breakpoints_for_session(
        &SessionId::new("s1"),
        &[ExceptionBreakpointsFilter {
            filter: "uncaught".to_string(),
            label: "Uncaught".to_string(),
            default: Some(true),
            ..ExceptionBreakpointsFilter::default()
        }],
    );

    model.enable_or_disable_all_breakpoints(false);
    assert!(!model.get_breakpoints(&BreakpointFilter::default())[0]
        .base
        .enabled);
    assert!(!model.get_function_breakpoints()[0].base.enabled);
    assert!(model.get_exception_breakpoints()[0].base.enabled);
}

#[test]
fn exception_filters_are_shared_between_sessions() {
    let model = DebugModel::default();
    let filters = [
        ExceptionBreakpointsFilter {
            filter: "caught".to_string(),
            label: "Caught Exceptions".to_string(),
            ..ExceptionBreakpointsFilter::default()
        },
        ExceptionBreakpointsFilter {
            filter: "uncaught".to_string(),
            label: "Uncaught Exceptions".to_string(),
            default: Some(true),
            supports_condition: Some(true),
            ..ExceptionBreakpointsFilter::default()
        },
    ];
    let s1 = SessionId::new("s1");
    let s2 = SessionId::new("s2");
    let mut events = model.subscribe();

    model.set_exception_breakpoints_for_session(&s1, &filters);
    model.set_exception_breakpoints_for_session(&s2, &filters[1..]);
    assert_eq!(drain(&mut events).len(), 1, "only new filters announce a change");

    let all = model.get_exception_breakpoints();
    assert_eq!(all.len(), 2);
    assert!(!all[0].base.enabled);
    assert!(all[1].base.enabled);
    assert_eq!(model.get_exception_breakpoints_for_session(Some(&s2)).len(), 1);
    assert!(model.get_exception_breakpoints_for_session(None).is_empty());

    model.set_exception_breakpoint_fallback_session(&s1);
    assert_eq!(model.get_exception_breakpoints_for_session(None).len(), 2);

    model.remove_exception_breakpoints_for_session(&s1);
    assert!(model.get_exception_breakpoints_for_session(Some(&s1)).is_empty());
    assert_eq!(model.get_exception_breakpoints_for_session(Some(&s2)).len(), 1);

    model.set_exception_breakpoint_condition(all[1].id(), Some("e.code == 3".to_string()));
    assert_eq!(
        model.get_exception_breakpoints()[1].base.condition.as_deref(),
        Some("e.code == 3")
    );
}

#[tokio::test]
async fn address_data_breakpoints_resolve_their_data_id_once_per_session() {
    let model = DebugModel::default();
    let bp = model.add_data_breakpoint(address_breakpoint(false));
    let mock = MockDebugSession::new("s1");
    mock.set_data_id("0x1000", "mem:0x1000:4");

    let first = bp.to_dap(&mock).await.expect("data id resolved");
    let second = bp.to_dap(&mock).await.expect("data id cached");
    assert_eq!(first.data_id, "mem:0x1000:4");
    assert_eq!(first, second);

    let lookups = mock
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MockCall::DataBytesBreakpointInfo { .. }))
        .count();
    assert_eq!(lookups, 1);

    let other = MockDebugSession::new("s2");
    assert!(bp.to_dap(&other).await.is_none());
}

#[test]
fn modes_from_several_debug_types_are_merged_and_disambiguated() {
    let model = DebugModel::default();
    let hardware = |mode: &str, applies_to: Vec<BreakpointModeApplicability>| BreakpointMode {
        mode: mode.to_string(),
        label: "Hardware".to_string(),
        description: None,
        applies_to,
    };

    model.register_breakpoint_modes("java", &[hardware("hw", vec![BreakpointModeApplicability::Source])]);
    model.register_breakpoint_modes("java", &[hardware("hw", vec![BreakpointModeApplicability::Data])]);
    model.register_breakpoint_modes("cpp", &[hardware("hardware", vec![BreakpointModeApplicability::Source])]);

    let labels: Vec<String> = model
        .get_breakpoint_modes(BreakpointModeApplicability::Source)
        .into_iter()
        .map(|mode| mode.label)
        .collect();
    assert_eq!(labels, vec!["Hardware (java)", "Hardware (cpp)"]);

    let data = model.get_breakpoint_modes(BreakpointModeApplicability::Data);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].mode, "hw");
    assert!(model
        .get_breakpoint_modes(BreakpointModeApplicability::Instruction)
        .is_empty());
}

#[test]
fn stored_state_round_trips_and_skips_transient_data_breakpoints() {
    let model = DebugModel::default();
    model.add_breakpoints(
        &file_uri("/src/Main.java"),
        vec![BreakpointOptions {
            line_number: 7,
            column: Some(3),
            condition: Some("x > 1".to_string()),
            ..BreakpointOptions::default()
        }],
        false,
    );
    model.add_function_breakpoint("main", Some("f1".to_string()));
    model.add_data_breakpoint(address_breakpoint(true));
    model.add_data_breakpoint(address_breakpoint(false));
    model.add_watch_expression(Some("count"));

    let stored = model.stored_state();
    assert_eq!(stored.data_breakpoints.len(), 1);
    assert_eq!(
        stored.function_breakpoints,
        vec![json!({ "id": "f1", "enabled": true, "name": "main" })]
    );
    assert_eq!(stored.breakpoints[0]["lineNumber"], json!(7));
    assert_eq!(stored.breakpoints[0]["uri"], json!("file:///src/Main.java"));

    let restored = DebugModel::default();
    restored.apply_stored_state(&stored);
    assert_eq!(restored.stored_state(), stored);
    let bp = &restored.get_breakpoints(&BreakpointFilter::default())[0];
    assert_eq!(bp.column(), Some(3));
    assert_eq!(bp.base.condition.as_deref(), Some("x > 1"));
}

#[tokio::test]
async fn reapplying_stored_state_keeps_what_sessions_reported() {
    let model = DebugModel::default();
    let session = SessionId::new("s1");
    let uri = file_uri("/src/Main.java");
    let added = model.add_breakpoints(&uri, vec![line(5), line(9)], false);
    let (kept, removed) = (added[0].id().to_string(), added[1].id().to_string());
    let reports = HashMap::from([(
        kept.clone(),
        protocol::Breakpoint {
            id: Some(1),
            verified: true,
            line: Some(7),
            ..protocol::Breakpoint::default()
        },
    )]);
    model.set_breakpoint_session_data(&session, &Capabilities::default(), Some(&reports));
    model.set_breakpoint_did_trigger(&kept, &session, true);
    model.set_exception_breakpoints_for_session(
        &session,
        &[ExceptionBreakpointsFilter {
            filter: "all".to_string(),
            label: "All Exceptions".to_string(),
            ..ExceptionBreakpointsFilter::default()
        }],
    );
    let persisted = model.add_data_breakpoint(address_breakpoint(true));
    model.add_data_breakpoint(address_breakpoint(false));

    let mock = MockDebugSession::new("s1");
    mock.set_data_id("0x1000", "mem:0x1000:4");
    persisted.to_dap(&mock).await.expect("data id resolved");

    model.apply_stored_state(&model.stored_state());

    let breakpoints = model.get_breakpoints(&BreakpointFilter::default());
    assert_eq!(breakpoints.len(), 2);
    assert!(breakpoints[0].verified());
    assert_eq!(breakpoints[0].line_number(), 7);
    assert!(breakpoints[0].session_did_trigger(&session));
    assert_eq!(model.get_exception_breakpoints_for_session(Some(&session)).len(), 1);
    assert_eq!(model.get_data_breakpoints().len(), 2, "transient data breakpoints stay");

    let data = model
        .get_data_breakpoints()
        .into_iter()
        .find(|bp| bp.id() == persisted.id())
        .expect("persisted data breakpoint");
    data.to_dap(&mock).await.expect("cached data id");
    let lookups = mock
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MockCall::DataBytesBreakpointInfo { .. }))
        .count();
    assert_eq!(lookups, 1);

    // Storage edits update persisted fields and drop missing entries.
    let mut edited = model.stored_state();
    edited.breakpoints.retain(|entry| entry["id"] != json!(removed));
    edited.breakpoints[0]["condition"] = json!("i > 3");
    model.apply_stored_state(&edited);

    let breakpoints = model.get_breakpoints(&BreakpointFilter::default());
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].id(), kept);
    assert_eq!(breakpoints[0].base.condition.as_deref(), Some("i > 3"));
    assert!(breakpoints[0].verified());
}
