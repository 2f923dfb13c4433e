//! Wire-contract compatibility: envelope round-trips, forward-compatible
//! decoding, and the exact payload shapes external collaborators rely on.

use conclave::protocol::{
    decode, encode, Envelope, Message, MessageIntent, StreamEvent, Task, TaskDiagnostics,
    TaskEvent, TaskOutcome, TaskResult,
};

#[test]
fn test_round_trip_all_variants() {
    let message = Message::new("t1", "client-1", "hello there", MessageIntent::Chat);
    let task = Task::new(
        "t1",
        "moderator",
        "analyze the logs",
        "worker_a",
        MessageIntent::StartTask,
        TaskEvent::Plan,
    )
    .with_confidence(0.9)
    .with_effort(conclave::protocol::ReasoningEffort::Medium)
    .with_priority(7)
    .with_diagnostics(TaskDiagnostics {
        word_count: 3,
        complexity_score: 1.0,
        ..TaskDiagnostics::default()
    });
    let result = TaskResult::new(
        "t1",
        "moderator",
        "all done",
        "client-1",
        TaskEvent::Complete,
        TaskOutcome::Completed,
    )
    .with_contributors(vec!["worker_a".into(), "arbitrator".into()]);

    for envelope in [
        Envelope::Message(message),
        Envelope::Task(task),
        Envelope::TaskResult(result),
    ] {
        let encoded = encode(&envelope).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }
}

#[test]
fn test_wire_payload_matches_contract() {
    let raw = r#"{
        "task_id": "task_123",
        "agent": "grok",
        "content": "Draft the summary",
        "intent": "start_task",
        "timestamp": "2025-03-26T14:00:00Z",
        "target_agent": "claude",
        "event": "plan",
        "confidence": 0.8,
        "reasoning_effort": "medium"
    }"#;

    let envelope = decode(raw).unwrap();
    let Envelope::Task(task) = envelope else {
        panic!("expected a task");
    };
    assert_eq!(task.agent, "grok");
    assert_eq!(task.target_agent, "claude");
    assert_eq!(task.event, TaskEvent::Plan);
    assert_eq!(
        task.reasoning_effort,
        Some(conclave::protocol::ReasoningEffort::Medium)
    );
}

#[test]
fn test_unknown_enum_literals_survive_decode() {
    let raw = r#"{
        "task_id": "task_9",
        "agent": "newer-peer",
        "content": "from the future",
        "intent": "negotiate_budget",
        "timestamp": "2025-03-26T14:00:00Z"
    }"#;

    let envelope = decode(raw).unwrap();
    assert_eq!(
        *envelope.intent(),
        MessageIntent::Unknown("negotiate_budget".to_string())
    );

    // Re-encoding preserves the literal for downstream peers.
    let encoded = encode(&envelope).unwrap();
    assert!(encoded.contains("negotiate_budget"));
}

#[test]
fn test_result_discriminated_by_outcome_field() {
    let raw = r#"{
        "task_id": "task_5",
        "agent": "worker_a",
        "content": "done",
        "intent": "modify_task",
        "timestamp": "2025-03-26T14:00:00+00:00",
        "target_agent": "moderator",
        "event": "complete",
        "outcome": "merged",
        "contributing_agents": ["worker_a", "refiner"]
    }"#;

    let Envelope::TaskResult(result) = decode(raw).unwrap() else {
        panic!("expected a result");
    };
    assert_eq!(result.outcome, TaskOutcome::Merged);
    assert_eq!(result.contributing_agents, vec!["worker_a", "refiner"]);
}

#[test]
fn test_stream_event_contract() {
    for (raw, expected_task) in [
        (
            r#"{"event":"stream_start","data":{"task_id":"t1","agent":"worker_a","timestamp":"2025-03-26T14:00:00Z"}}"#,
            "t1",
        ),
        (
            r#"{"event":"stream_update","data":{"task_id":"t1","agent":"worker_a","delta":"The text"}}"#,
            "t1",
        ),
        (
            r#"{"event":"stream_end","data":{"task_id":"t1","agent":"worker_a"}}"#,
            "t1",
        ),
    ] {
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.task_id(), expected_task);
        assert_eq!(event.agent(), "worker_a");
    }
}

#[test]
fn test_missing_required_field_fails_decode() {
    let raw = r#"{"agent":"x","content":"no task id","intent":"chat","timestamp":"2025-03-26T14:00:00Z"}"#;
    assert!(decode(raw).is_err());
}
