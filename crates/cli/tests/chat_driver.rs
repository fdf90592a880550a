use std::sync::Arc;

use tempra_agent::{Orchestrator, OrchestratorDeps, ScriptedGateway, TracingAuditSink};
use tempra_cli::commands::chat::{ChatDriver, ChatStep};
use tempra_core::config::AppConfig;
use tempra_core::providers::{
    InMemoryCalendar, InMemoryMailbox, StaticCredentialProvider, TodoKind, TodoQuery, TodoStore,
};
use tempra_core::{IntentLabel, SessionId, UserIdentity};
use tempra_db::{InMemoryPlanStore, InMemoryTodoStore};

fn driver(gateway: &ScriptedGateway, todos: &InMemoryTodoStore) -> ChatDriver {
    let deps = OrchestratorDeps {
        gateway: Arc::new(gateway.clone()),
        calendar: Arc::new(InMemoryCalendar::default()),
        email: Arc::new(InMemoryMailbox::default()),
        todos: Arc::new(todos.clone()),
        plans: Arc::new(InMemoryPlanStore::default()),
        credentials: Arc::new(StaticCredentialProvider::shared(None)),
        audit: Arc::new(TracingAuditSink),
    };
    ChatDriver::new(
        Orchestrator::new(deps, &AppConfig::default()),
        UserIdentity::new("u-1"),
        SessionId::new("cli-test"),
    )
}

fn reply_text(step: ChatStep) -> String {
    match step {
        ChatStep::Reply(text) => text,
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn control_lines_do_not_reach_the_model() {
    let gateway = ScriptedGateway::default();
    let mut driver = driver(&gateway, &InMemoryTodoStore::default());

    assert_eq!(driver.handle_line("   ").await, ChatStep::Idle);
    assert_eq!(
        driver.handle_line("/accept").await,
        ChatStep::Reply("There is nothing waiting for confirmation.".to_string())
    );
    assert_eq!(driver.handle_line("/quit").await, ChatStep::Quit);
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn reminder_is_drafted_then_committed_on_accept() {
    let gateway = ScriptedGateway::new([
        "SINGLE",
        "Remind",
        r#"{"title": "Stretch", "due_at": "2026-03-16T15:00:00", "missing_fields": [], "confirmation_message": "I'll remind you to stretch on Monday at 15:00. Shall I set it?"}"#,
    ]);
    let todos = InMemoryTodoStore::default();
    let mut driver = driver(&gateway, &todos);

    let drafted = reply_text(driver.handle_line("remind me to stretch monday at 3pm").await);
    assert!(drafted.starts_with("I'll remind you to stretch"));
    assert!(drafted.contains("/accept"));
    assert_eq!(driver.session().active_intent, Some(IntentLabel::Remind));
    assert!(driver.session().pending_draft.is_some());

    let committed = reply_text(driver.handle_line("/accept").await);
    assert!(committed.starts_with("Reminder set: Stretch"), "got {committed}");
    assert_eq!(driver.session().active_intent, Some(IntentLabel::General));
    assert!(driver.session().pending_draft.is_none());

    let stored = todos.query("u-1", TodoQuery::default()).await.expect("query");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].kind, TodoKind::Reminder);

    assert_eq!(
        reply_text(driver.handle_line("/deny").await),
        "There is nothing waiting for confirmation."
    );
}

#[tokio::test]
async fn gateway_outage_leaves_routing_state_alone() {
    let gateway = ScriptedGateway::default();
    let mut driver = driver(&gateway, &InMemoryTodoStore::default());

    let reply = reply_text(driver.handle_line("hello?").await);
    assert!(reply.contains("trouble thinking"));
    assert_eq!(driver.session().active_intent, None);
    assert!(driver.session().pending_draft.is_none());
    assert_eq!(driver.session().history.len(), 2);
}
