use std::sync::Arc;
use std::time::Duration;

use nova_debug_model::mock::{stack_frames, MockCall, MockDebugSession};
use nova_debug_model::protocol::{self, SteppingGranularity};
use nova_debug_model::source::SourceRange;
use nova_debug_model::{DebugModel, DebugModelEvent, DebugSession, SessionId};
use pretty_assertions::assert_eq;

use crate::harness::{add_session, delayed_loading, drain, mock_session, mock_session_with, stop_thread};

fn session_id(mock: &MockDebugSession) -> SessionId {
    mock.id()
}

#[tokio::test]
async fn call_stack_is_fetched_page_by_page_until_total_frames() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(45, "/src/Deep.java"), Some(45));
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");

    model.fetch_call_stack(&thread, None).await;
    assert_eq!(thread.call_stack().len(), 20);
    assert!(!thread.reached_end_of_call_stack());
    assert_eq!(
        thread.stopped_details().and_then(|details| details.total_frames),
        Some(45)
    );

    model.fetch_call_stack(&thread, Some(20)).await;
    model.fetch_call_stack(&thread, Some(20)).await;
    assert_eq!(thread.call_stack().len(), 45);
    assert!(thread.reached_end_of_call_stack());

    // Nothing remains, so no further request goes out.
    model.fetch_call_stack(&thread, Some(20)).await;
    assert_eq!(mock.stack_trace_calls(), vec![(0, 20), (20, 20), (40, 20)]);

    let frames = thread.call_stack();
    let indexes: Vec<i64> = frames.iter().map(|frame| frame.index()).collect();
    assert_eq!(indexes, (0..45).collect::<Vec<_>>());
    assert_eq!(frames[44].frame_id(), 45);
    assert_eq!(frames[0].to_string(), "frame1 (/src/Deep.java:1)");
}

#[tokio::test(start_paused = true)]
async fn repeated_refreshes_share_one_deep_fetch() {
    let model = DebugModel::default();
    let mock = mock_session_with("s1", delayed_loading());
    mock.set_stack_frames(1, stack_frames(45, "/src/Deep.java"), Some(45));
    add_session(&model, &mock);
    let id = session_id(&mock);

    let thread = stop_thread(&model, &id, 1, "step");
    let first = model.refresh_top_of_call_stack(&thread, true);
    first.top_call_stack.await;
    assert_eq!(thread.call_stack().len(), 1);
    assert_eq!(mock.stack_trace_calls(), vec![(0, 1)]);

    // A second stop inside the debounce window joins the pending deep fetch.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let thread = stop_thread(&model, &id, 1, "step");
    let second = model.refresh_top_of_call_stack(&thread, true);
    second.top_call_stack.await;

    let mut events = model.subscribe();
    futures::future::join(first.whole_call_stack, second.whole_call_stack).await;

    assert_eq!(mock.stack_trace_calls(), vec![(0, 1), (0, 1), (1, 19)]);
    assert_eq!(thread.call_stack().len(), 20);
    assert!(drain(&mut events).contains(&DebugModelEvent::CallStackChanged(Some(id))));
}

#[tokio::test(start_paused = true)]
async fn deep_fetch_waits_for_the_debounce_window() {
    let model = DebugModel::default();
    let mock = mock_session_with("s1", delayed_loading());
    mock.set_stack_frames(1, stack_frames(5, "/src/Short.java"), None);
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");

    let refresh = model.refresh_top_of_call_stack(&thread, true);
    refresh.top_call_stack.await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mock.stack_trace_calls(), vec![(0, 1)]);

    refresh.whole_call_stack.await;
    assert_eq!(mock.stack_trace_calls(), vec![(0, 1), (1, 19)]);
    assert_eq!(thread.call_stack().len(), 5);
    assert!(thread.reached_end_of_call_stack());
}

#[tokio::test]
async fn refresh_without_delayed_loading_fetches_once() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(30, "/src/Main.java"), None);
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "pause");

    let refresh = model.refresh_top_of_call_stack(&thread, true);
    refresh.top_call_stack.await;
    refresh.whole_call_stack.await;

    assert_eq!(mock.stack_trace_calls(), vec![(0, 20)]);
    assert_eq!(thread.call_stack().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn clear_threads_resolves_pending_deep_fetches() {
    let model = DebugModel::default();
    let mock = mock_session_with("s1", delayed_loading());
    mock.set_stack_frames(1, stack_frames(45, "/src/Deep.java"), Some(45));
    add_session(&model, &mock);
    let id = session_id(&mock);
    let thread = stop_thread(&model, &id, 1, "breakpoint");

    let refresh = model.refresh_top_of_call_stack(&thread, true);
    refresh.top_call_stack.await;
    model.clear_threads(&id, false, None);
    refresh.whole_call_stack.await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(mock.stack_trace_calls(), vec![(0, 1)]);
    assert!(!thread.stopped());
    assert!(thread.call_stack().is_empty());
    assert_eq!(thread.stale_call_stack().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_fetch_leaves_the_stack_untouched() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(10, "/src/Main.java"), None);
    mock.set_stack_trace_delay(Some(Duration::from_secs(5)));
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");

    let fetching = {
        let thread = Arc::clone(&thread);
        tokio::spawn(async move { thread.fetch_call_stack(20).await })
    };
    while mock.stack_trace_calls().is_empty() {
        tokio::task::yield_now().await;
    }
    thread.clear_call_stack();
    fetching.await.expect("fetch task");

    assert!(thread.call_stack().is_empty());
    assert!(!thread.reached_end_of_call_stack());
}

#[tokio::test]
async fn failed_fetch_ends_the_stack_and_records_the_error() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.fail_stack_trace(Some("thread is running".to_string()));
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");

    model.fetch_call_stack(&thread, None).await;

    assert!(thread.call_stack().is_empty());
    assert!(thread.reached_end_of_call_stack());
    assert_eq!(
        thread
            .stopped_details()
            .and_then(|details| details.frames_error_message),
        Some("thread is running".to_string())
    );
}

#[tokio::test]
async fn fetch_is_skipped_while_running() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(3, "/src/Main.java"), None);
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");
    thread.set_stopped(false);

    thread.fetch_call_stack(20).await;
    assert!(mock.stack_trace_calls().is_empty());
}

#[tokio::test]
async fn top_frame_skips_deemphasized_and_unavailable_frames() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    let mut frames = stack_frames(3, "/src/Main.java");
    frames[0].presentation_hint = Some("subtle".to_string());
    frames[0].source = Some(protocol::Source {
        name: Some("Native.java".to_string()),
        path: Some("/lib/Native.java".to_string()),
        ..protocol::Source::default()
    });
    mock.set_stack_frames(1, frames, None);
    add_session(&model, &mock);
    let id = session_id(&mock);

    let thread = stop_thread(&model, &id, 1, "exception");
    model.fetch_call_stack(&thread, None).await;
    assert_eq!(thread.get_top_stack_frame().map(|f| f.frame_id()), Some(2));

    // Breakpoint and step stops keep the deemphasized top frame.
    let thread = stop_thread(&model, &id, 1, "breakpoint");
    model.fetch_call_stack(&thread, None).await;
    let top = thread.get_top_stack_frame().expect("top frame");
    assert_eq!(top.frame_id(), 1);
    assert!(top.is_deemphasized());

    model.source_is_not_available(top.source().uri());
    assert_eq!(thread.get_top_stack_frame().map(|f| f.frame_id()), Some(2));
}

#[tokio::test]
async fn instruction_stops_prefer_frames_with_an_instruction_pointer() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    let mut frames = stack_frames(2, "/src/Main.java");
    frames[1].instruction_pointer_reference = Some("0x1000".to_string());
    mock.set_stack_frames(1, frames, None);
    add_session(&model, &mock);
    let id = session_id(&mock);

    let thread = stop_thread(&model, &id, 1, "instruction breakpoint");
    model.fetch_call_stack(&thread, None).await;
    let top = thread.get_top_stack_frame().expect("top frame");
    assert_eq!(top.frame_id(), 1, "available source still qualifies");

    model.source_is_not_available(top.source().uri());
    let top = thread.get_top_stack_frame().expect("top frame");
    assert_eq!(top.frame_id(), 2);
    assert_eq!(top.instruction_pointer_reference(), Some("0x1000"));

    thread.next(Some(SteppingGranularity::Instruction)).await.expect("step");
    assert_eq!(
        thread.last_stepping_granularity(),
        Some(SteppingGranularity::Instruction)
    );
}

#[tokio::test]
async fn scopes_are_requested_once_per_frame() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(1, "/src/Main.java"), None);
    mock.set_scopes(
        1,
        vec![
            protocol::Scope {
                name: "Locals".to_string(),
                variables_reference: 10,
                ..protocol::Scope::default()
            },
            protocol::Scope {
                name: "Globals".to_string(),
                variables_reference: 11,
                expensive: true,
                ..protocol::Scope::default()
            },
        ],
    );
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");
    model.fetch_call_stack(&thread, None).await;
    let frame = thread.get_top_stack_frame().expect("top frame");

    let scopes = frame.get_scopes().await;
    let again = frame.get_scopes().await;
    assert!(Arc::ptr_eq(&scopes[0], &again[0]));
    assert_eq!(scopes.len(), 2);
    assert_ne!(scopes[0].id(), scopes[1].id());

    let cheap = frame.get_most_specific_scopes(SourceRange::new(1, 1, 1, 1)).await;
    let names: Vec<&str> = cheap.iter().map(|scope| scope.name()).collect();
    assert_eq!(names, vec!["Locals"]);

    frame.forget_scopes();
    frame.get_scopes().await;
    let requests = mock
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MockCall::Scopes { .. }))
        .count();
    assert_eq!(requests, 2);
}

#[tokio::test]
async fn most_specific_scopes_narrow_to_the_innermost_range() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(1, "/src/Main.java"), None);
    let ranged = |name: &str, reference: i64, start: i64, end: i64| protocol::Scope {
        name: name.to_string(),
        variables_reference: reference,
        line: Some(start),
        column: Some(1),
        end_line: Some(end),
        end_column: Some(1),
        ..protocol::Scope::default()
    };
    mock.set_scopes(
        1,
        vec![ranged("Function", 10, 1, 50), ranged("Block", 11, 10, 20), ranged("Other", 12, 30, 40)],
    );
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");
    model.fetch_call_stack(&thread, None).await;
    let frame = thread.get_top_stack_frame().expect("top frame");

    let scopes = frame
        .get_most_specific_scopes(SourceRange::new(12, 1, 12, 5))
        .await;
    let names: Vec<&str> = scopes.iter().map(|scope| scope.name()).collect();
    assert_eq!(names, vec!["Block", "Function"]);
}

#[tokio::test]
async fn failed_scopes_request_yields_an_error_scope() {
    let model = DebugModel::default();
    let mock = mock_session("s1");
    mock.set_stack_frames(1, stack_frames(1, "/src/Main.java"), None);
    mock.fail_scopes(1, "frame is gone");
    add_session(&model, &mock);
    let thread = stop_thread(&model, &session_id(&mock), 1, "breakpoint");
    model.fetch_call_stack(&thread, None).await;
    let frame = thread.get_top_stack_frame().expect("top frame");

    let scopes = frame.get_scopes().await;
    assert_eq!(scopes.len(), 1);
    assert!(scopes[0].is_error());
    assert_eq!(scopes[0].name(), "frame is gone");
    assert!(scopes[0].get_children().await.is_empty());
}

#[tokio::test]
async fn exception_info_uses_the_adapter_when_supported() {
    let model = DebugModel::default();
    let plain = mock_session("plain");
    add_session(&model, &plain);
    model.raw_update(nova_debug_model::RawModelUpdate {
        session_id: session_id(&plain),
        threads: vec![protocol::Thread {
            id: 1,
            name: "main".to_string(),
        }],
        stopped_details: Some(nova_debug_model::StoppedDetails {
            reason: Some("exception".to_string()),
            text: Some("NullPointerException".to_string()),
            thread_id: Some(1),
            ..Default::default()
        }),
    });
    let thread = model
        .get_session(&session_id(&plain), false)
        .and_then(|session| session.get_thread(1))
        .expect("thread");
    let info = thread.exception_info().await.expect("exception info");
    assert_eq!(info.description.as_deref(), Some("NullPointerException"));
    assert_eq!(info.id, None);

    let rich = mock_session_with(
        "rich",
        protocol::Capabilities {
            supports_exception_info_request: true,
            ..protocol::Capabilities::default()
        },
    );
    rich.set_exception_info(
        1,
        protocol::ExceptionInfoResponse {
            exception_id: "java.lang.IllegalStateException".to_string(),
            description: Some("bad state".to_string()),
            break_mode: Some("unhandled".to_string()),
            details: None,
        },
    );
    add_session(&model, &rich);
    let thread = stop_thread(&model, &session_id(&rich), 1, "exception");
    let info = thread.exception_info().await.expect("exception info");
    assert_eq!(info.id.as_deref(), Some("java.lang.IllegalStateException"));
    assert_eq!(info.break_mode.as_deref(), Some("unhandled"));
    assert!(rich.calls().contains(&MockCall::ExceptionInfo { thread_id: 1 }));

    let stepped = stop_thread(&model, &session_id(&rich), 1, "step");
    assert!(stepped.exception_info().await.is_none());
}
