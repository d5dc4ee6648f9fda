//! Trace files: one JSON transport input per line.
//!
//! ```text
//! {"op": "write", "path": "waiters/w1", "value": {"active_calls": ["c1"]}}
//! {"op": "attach", "subject": "w1"}
//! {"op": "worker", "message": {"type": "fcm_event", "payload": {"data": {"call_id": "c1"}}}}
//! {"op": "foreground", "payload": {"data": {"call_id": "c1", "type": "acknowledged"}}}
//! {"op": "write", "path": "active_calls/c1", "value": null}
//! ```

use anyhow::{Context as _, Result};
use mozo_core::{
  entity::{EntityId, SubjectId},
  kind::EntityKind,
};
use mozo_realtime_memory::MemoryDatabase;
use mozo_reconcile::{PushPayload, ReconciliationEngine};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
  /// A raw service-worker `postMessage`.
  Worker { message: Value },
  /// A foreground push payload.
  Foreground { payload: PushPayload },
  /// A server-side write to the realtime database; `null` removes the node.
  Write {
    path:  String,
    #[serde(default)]
    value: Value,
  },
  Attach { subject: SubjectId },
  Detach { subject: SubjectId },
  AttachFeed { subject: SubjectId },
  DetachFeed { subject: SubjectId },
  Watch { id: EntityId },
  Unwatch { id: EntityId },
}

/// Parse a whole trace, skipping blank lines and `#` comments.
pub fn parse(input: &str) -> Result<Vec<Step>> {
  input
    .lines()
    .enumerate()
    .filter(|(_, line)| {
      let line = line.trim();
      !line.is_empty() && !line.starts_with('#')
    })
    .map(|(n, line)| {
      serde_json::from_str(line).with_context(|| format!("trace line {}", n + 1))
    })
    .collect()
}

/// Feed one step into the engine and process whatever realtime deliveries it
/// caused.
pub fn apply<K: EntityKind>(
  engine: &mut ReconciliationEngine<K, MemoryDatabase>,
  db: &MemoryDatabase,
  step: Step,
) -> Result<()> {
  match step {
    Step::Worker { message } => {
      engine.on_worker_message(message);
    }
    Step::Foreground { payload } => {
      engine.on_foreground_push(payload);
    }
    Step::Write { path, value } => {
      db.set(&path, value)
        .with_context(|| format!("writing {path}"))?;
    }
    Step::Attach { subject } => {
      engine
        .attach_subject(subject.clone())
        .with_context(|| format!("attaching {subject}"))?;
    }
    Step::Detach { subject } => engine.detach_subject(&subject),
    Step::AttachFeed { subject } => {
      engine
        .attach_feed(subject.clone())
        .with_context(|| format!("attaching feed {subject}"))?;
    }
    Step::DetachFeed { subject } => engine.detach_feed(&subject),
    Step::Watch { id } => engine.watch(id),
    Step::Unwatch { id } => engine.unwatch(&id),
  }
  engine.drain();
  Ok(())
}

#[cfg(test)]
mod tests {
  use mozo_core::kind::{Call, CallStatus};
  use mozo_reconcile::EngineConfig;

  use super::*;

  const TRACE: &str = r#"
# waiter w1 has one active call
{"op": "write", "path": "active_calls/c1", "value": {"status": "pending", "table_id": 5}}
{"op": "write", "path": "waiters/w1", "value": {"active_calls": ["c1"]}}
{"op": "attach", "subject": "w1"}
{"op": "write", "path": "businesses/b1", "value": {"stats": {"pending_count": 1}}}
{"op": "attach_feed", "subject": "b1"}
{"op": "foreground", "payload": {"data": {"call_id": "c1", "type": "acknowledged"}}}
{"op": "worker", "message": {"type": "fcm_event", "payload": {"data": {"callId": "c1", "type": "new_call"}}}}
"#;

  #[test]
  fn parses_and_skips_comments() {
    let steps = parse(TRACE).unwrap();
    assert_eq!(steps.len(), 7);
    assert!(matches!(steps[4], Step::AttachFeed { .. }));
    assert!(matches!(steps[2], Step::Attach { .. }));
  }

  #[test]
  fn bad_line_reports_its_number() {
    let err = parse("{\"op\": \"attach\", \"subject\": \"w1\"}\n{\"op\": \"nope\"}")
      .unwrap_err();
    assert!(format!("{err:#}").contains("trace line 2"));
  }

  #[test]
  fn replay_reconciles_the_trace() {
    let db = MemoryDatabase::new();
    let mut engine: ReconciliationEngine<Call, _> =
      ReconciliationEngine::new(db.clone(), EngineConfig::for_kind::<Call>());
    for step in parse(TRACE).unwrap() {
      apply(&mut engine, &db, step).unwrap();
    }
    let c1 = engine.store().get(&EntityId::new("c1")).unwrap();
    assert_eq!(c1.status, CallStatus::Acknowledged);
    assert_eq!(c1.payload.get("table_id"), Some(&serde_json::json!(5)));
    assert_eq!(
      engine.stats().get("pending_count"),
      Some(&serde_json::json!(1))
    );
  }
}
