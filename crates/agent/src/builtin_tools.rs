//! Tools over the calendar, email and todo collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use tempra_core::domain::timestamp::{normalize_date, normalize_datetime};
use tempra_core::providers::{
    CalendarProvider, EmailProvider, EventUpdate, NewEvent, NewTodo, OutgoingEmail, TodoKind,
    TodoQuery, TodoStore,
};

use crate::tools::{ImplicitParam, ParamSpec, ParamType, Tool, ToolRegistry, ToolSpec};

const ACCESS_TOKEN: ParamSpec = ParamSpec::implicit("access_token", ImplicitParam::AccessToken);
const USER_ID: ParamSpec = ParamSpec::implicit("user_id", ImplicitParam::UserId);

pub static SEARCH_EMAIL: ToolSpec = ToolSpec {
    name: "search_email",
    description: "Search the user's mailbox and return matching messages",
    params: &[
        ParamSpec::required("query", ParamType::String, "words to search for"),
        ParamSpec::optional("limit", ParamType::Integer, "maximum results, default 10"),
        ACCESS_TOKEN,
    ],
};

pub static SEND_EMAIL: ToolSpec = ToolSpec {
    name: "send_email",
    description: "Send an email immediately",
    params: &[
        ParamSpec::required("recipient", ParamType::String, "recipient email address"),
        ParamSpec::required("subject", ParamType::String, "subject line"),
        ParamSpec::required("body", ParamType::String, "message body"),
        ACCESS_TOKEN,
    ],
};

pub static DRAFT_EMAIL: ToolSpec = ToolSpec {
    name: "draft_email",
    description: "Save an email as a draft without sending it",
    params: &[
        ParamSpec::required("recipient", ParamType::String, "recipient email address"),
        ParamSpec::required("subject", ParamType::String, "subject line"),
        ParamSpec::required("body", ParamType::String, "message body"),
        ACCESS_TOKEN,
    ],
};

pub static ADD_CALENDAR_EVENT: ToolSpec = ToolSpec {
    name: "add_calendar_event",
    description: "Create a calendar event",
    params: &[
        ParamSpec::required("title", ParamType::String, "event title"),
        ParamSpec::required("start_time", ParamType::DateTime, "event start"),
        ParamSpec::optional("end_time", ParamType::DateTime, "event end, default one hour later"),
        ParamSpec::optional("attendees", ParamType::StringList, "attendee email addresses"),
        ACCESS_TOKEN,
    ],
};

pub static UPDATE_CALENDAR_EVENT: ToolSpec = ToolSpec {
    name: "update_calendar_event",
    description: "Change the title or time of an existing calendar event",
    params: &[
        ParamSpec::required("event_id", ParamType::String, "id returned when the event was listed or created"),
        ParamSpec::optional("title", ParamType::String, "new title"),
        ParamSpec::optional("start_time", ParamType::DateTime, "new start"),
        ParamSpec::optional("end_time", ParamType::DateTime, "new end"),
        ACCESS_TOKEN,
    ],
};

pub static DELETE_CALENDAR_EVENT: ToolSpec = ToolSpec {
    name: "delete_calendar_event",
    description: "Delete a calendar event",
    params: &[
        ParamSpec::required("event_id", ParamType::String, "id of the event to delete"),
        ACCESS_TOKEN,
    ],
};

pub static LIST_CALENDAR_EVENTS: ToolSpec = ToolSpec {
    name: "list_calendar_events",
    description: "List calendar events between two date-times",
    params: &[
        ParamSpec::required("from", ParamType::DateTime, "window start"),
        ParamSpec::required("to", ParamType::DateTime, "window end"),
        ACCESS_TOKEN,
    ],
};

pub static ADD_TODO: ToolSpec = ToolSpec {
    name: "add_todo",
    description: "Add an item to the user's todo list",
    params: &[
        ParamSpec::required("title", ParamType::String, "what needs doing"),
        ParamSpec::optional("due_date", ParamType::Date, "due date"),
        USER_ID,
    ],
};

pub static LIST_TODOS: ToolSpec = ToolSpec {
    name: "list_todos",
    description: "List the user's open todo items",
    params: &[
        ParamSpec::optional("include_completed", ParamType::Boolean, "also list finished items"),
        USER_ID,
    ],
};

pub static ADD_REMINDER: ToolSpec = ToolSpec {
    name: "add_reminder",
    description: "Remind the user about something at a specific date-time",
    params: &[
        ParamSpec::required("title", ParamType::String, "what to be reminded about"),
        ParamSpec::required("remind_at", ParamType::DateTime, "when the reminder fires"),
        USER_ID,
    ],
};

/// Collaborators shared by the built-in tools.
#[derive(Clone)]
pub struct ToolDeps {
    pub calendar: Arc<dyn CalendarProvider>,
    pub email: Arc<dyn EmailProvider>,
    pub todos: Arc<dyn TodoStore>,
    pub local_offset: FixedOffset,
    pub default_event_length: Duration,
}

pub fn default_catalog(deps: ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(SearchEmail(deps.clone()));
    registry.register(SendEmail { deps: deps.clone(), draft_only: false });
    registry.register(SendEmail { deps: deps.clone(), draft_only: true });
    registry.register(AddCalendarEvent(deps.clone()));
    registry.register(UpdateCalendarEvent(deps.clone()));
    registry.register(DeleteCalendarEvent(deps.clone()));
    registry.register(ListCalendarEvents(deps.clone()));
    registry.register(AddTodo(deps.clone()));
    registry.register(ListTodos(deps.clone()));
    registry.register(AddReminder(deps));
    registry
}

fn decode<T: for<'de> Deserialize<'de>>(tool: &str, input: Value) -> Result<T> {
    serde_json::from_value(input).with_context(|| format!("invalid arguments for {tool}"))
}

fn token(raw: Option<String>) -> Result<SecretString> {
    raw.filter(|value| !value.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| anyhow!("missing access token; the user must re-authenticate"))
}

fn instant(deps: &ToolDeps, field: &str, raw: &str) -> Result<DateTime<FixedOffset>> {
    normalize_datetime(raw, deps.local_offset).ok_or_else(|| {
        anyhow!("{field} must be an ISO 8601 date-time with a date, got `{raw}`")
    })
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<usize>,
    access_token: Option<String>,
}

struct SearchEmail(ToolDeps);

#[async_trait]
impl Tool for SearchEmail {
    fn spec(&self) -> &'static ToolSpec {
        &SEARCH_EMAIL
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: SearchArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        let limit = args.limit.unwrap_or(10).clamp(1, 50);
        let found = self.0.email.search_emails(&token, &args.query, limit).await?;
        Ok(json!({ "count": found.len(), "messages": found }))
    }
}

#[derive(Deserialize)]
struct EmailArgs {
    recipient: String,
    subject: String,
    body: String,
    access_token: Option<String>,
}

struct SendEmail {
    deps: ToolDeps,
    draft_only: bool,
}

#[async_trait]
impl Tool for SendEmail {
    fn spec(&self) -> &'static ToolSpec {
        if self.draft_only {
            &DRAFT_EMAIL
        } else {
            &SEND_EMAIL
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: EmailArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        let email = OutgoingEmail {
            recipient: args.recipient,
            subject: args.subject,
            body: args.body,
            attachments: Vec::new(),
            folder: None,
            priority: None,
        };

        if self.draft_only {
            let id = self.deps.email.create_draft(&token, email).await?;
            Ok(json!({ "status": "drafted", "draft_id": id }))
        } else {
            let id = self.deps.email.send_email(&token, email).await?;
            Ok(json!({ "status": "sent", "message_id": id }))
        }
    }
}

#[derive(Deserialize)]
struct AddEventArgs {
    title: String,
    start_time: String,
    end_time: Option<String>,
    #[serde(default)]
    attendees: Vec<String>,
    access_token: Option<String>,
}

struct AddCalendarEvent(ToolDeps);

#[async_trait]
impl Tool for AddCalendarEvent {
    fn spec(&self) -> &'static ToolSpec {
        &ADD_CALENDAR_EVENT
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: AddEventArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        let start = instant(&self.0, "start_time", &args.start_time)?;
        let end = match args.end_time.as_deref() {
            Some(raw) => instant(&self.0, "end_time", raw)?,
            None => start + chrono::Duration::from_std(self.0.default_event_length)?,
        };

        let event = self
            .0
            .calendar
            .insert_event(
                &token,
                NewEvent { title: args.title, start, end, attendees: args.attendees },
            )
            .await?;
        Ok(serde_json::to_value(event)?)
    }
}

#[derive(Deserialize)]
struct UpdateEventArgs {
    event_id: String,
    title: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    access_token: Option<String>,
}

struct UpdateCalendarEvent(ToolDeps);

#[async_trait]
impl Tool for UpdateCalendarEvent {
    fn spec(&self) -> &'static ToolSpec {
        &UPDATE_CALENDAR_EVENT
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: UpdateEventArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        let update = EventUpdate {
            title: args.title,
            start: args.start_time.as_deref().map(|raw| instant(&self.0, "start_time", raw)).transpose()?,
            end: args.end_time.as_deref().map(|raw| instant(&self.0, "end_time", raw)).transpose()?,
            attendees: None,
        };
        if update == EventUpdate::default() {
            bail!("update_calendar_event needs at least one of title, start_time, end_time");
        }

        let event = self.0.calendar.update_event(&token, &args.event_id, update).await?;
        Ok(serde_json::to_value(event)?)
    }
}

#[derive(Deserialize)]
struct DeleteEventArgs {
    event_id: String,
    access_token: Option<String>,
}

struct DeleteCalendarEvent(ToolDeps);

#[async_trait]
impl Tool for DeleteCalendarEvent {
    fn spec(&self) -> &'static ToolSpec {
        &DELETE_CALENDAR_EVENT
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: DeleteEventArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        self.0.calendar.delete_event(&token, &args.event_id).await?;
        Ok(json!({ "status": "deleted", "event_id": args.event_id }))
    }
}

#[derive(Deserialize)]
struct ListEventsArgs {
    from: String,
    to: String,
    access_token: Option<String>,
}

struct ListCalendarEvents(ToolDeps);

#[async_trait]
impl Tool for ListCalendarEvents {
    fn spec(&self) -> &'static ToolSpec {
        &LIST_CALENDAR_EVENTS
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: ListEventsArgs = decode(self.name(), input)?;
        let token = token(args.access_token)?;
        let from = instant(&self.0, "from", &args.from)?;
        let to = instant(&self.0, "to", &args.to)?;
        let events = self.0.calendar.list_events(&token, from, to).await?;
        Ok(json!({ "count": events.len(), "events": events }))
    }
}

#[derive(Deserialize)]
struct AddTodoArgs {
    title: String,
    due_date: Option<String>,
    user_id: String,
}

struct AddTodo(ToolDeps);

#[async_trait]
impl Tool for AddTodo {
    fn spec(&self) -> &'static ToolSpec {
        &ADD_TODO
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: AddTodoArgs = decode(self.name(), input)?;
        if args.title.trim().is_empty() {
            bail!("title must not be empty");
        }
        let due_date = match args.due_date.as_deref() {
            Some(raw) => Some(
                normalize_date(raw, self.0.local_offset)
                    .ok_or_else(|| anyhow!("due_date must be YYYY-MM-DD, got `{raw}`"))?,
            ),
            None => None,
        };

        let item = self
            .0
            .todos
            .append(NewTodo {
                user_id: args.user_id,
                title: args.title.trim().to_owned(),
                due_date,
                remind_at: None,
                kind: TodoKind::Task,
            })
            .await?;
        Ok(json!({ "status": "added", "id": item.id, "title": item.title }))
    }
}

#[derive(Deserialize)]
struct ListTodosArgs {
    #[serde(default)]
    include_completed: bool,
    user_id: String,
}

struct ListTodos(ToolDeps);

#[async_trait]
impl Tool for ListTodos {
    fn spec(&self) -> &'static ToolSpec {
        &LIST_TODOS
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: ListTodosArgs = decode(self.name(), input)?;
        let items = self
            .0
            .todos
            .query(
                &args.user_id,
                TodoQuery { include_completed: args.include_completed, kind: None },
            )
            .await?;
        Ok(json!({ "count": items.len(), "items": items }))
    }
}

#[derive(Deserialize)]
struct AddReminderArgs {
    title: String,
    remind_at: String,
    user_id: String,
}

struct AddReminder(ToolDeps);

#[async_trait]
impl Tool for AddReminder {
    fn spec(&self) -> &'static ToolSpec {
        &ADD_REMINDER
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let args: AddReminderArgs = decode(self.name(), input)?;
        let remind_at = instant(&self.0, "remind_at", &args.remind_at)?;
        let item = self
            .0
            .todos
            .append(NewTodo {
                user_id: args.user_id,
                title: args.title,
                due_date: Some(remind_at.date_naive()),
                remind_at: Some(remind_at),
                kind: TodoKind::Reminder,
            })
            .await?;
        Ok(json!({ "status": "scheduled", "id": item.id, "remind_at": remind_at.to_rfc3339() }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempra_core::domain::timestamp::utc_offset;
    use tempra_core::providers::{InMemoryCalendar, InMemoryMailbox, TodoQuery, TodoStore};
    use tempra_db::InMemoryTodoStore;

    use super::{default_catalog, ToolDeps};

    fn deps() -> (ToolDeps, InMemoryCalendar, InMemoryTodoStore) {
        let calendar = InMemoryCalendar::default();
        let todos = InMemoryTodoStore::default();
        let deps = ToolDeps {
            calendar: Arc::new(calendar.clone()),
            email: Arc::new(InMemoryMailbox::default()),
            todos: Arc::new(todos.clone()),
            local_offset: utc_offset(0),
            default_event_length: Duration::from_secs(3600),
        };
        (deps, calendar, todos)
    }

    #[test]
    fn catalog_contains_every_builtin_tool() {
        let (deps, _, _) = deps();
        let catalog = default_catalog(deps);
        assert_eq!(
            catalog.names(),
            vec![
                "add_calendar_event",
                "add_reminder",
                "add_todo",
                "delete_calendar_event",
                "draft_email",
                "list_calendar_events",
                "list_todos",
                "search_email",
                "send_email",
                "update_calendar_event",
            ]
        );
    }

    #[tokio::test]
    async fn add_calendar_event_defaults_to_one_hour() {
        let (deps, calendar, _) = deps();
        let tool = default_catalog(deps).get("add_calendar_event").expect("registered");

        tool.execute(json!({
            "title": "Standup",
            "start_time": "2026-03-16T09:00:00",
            "access_token": "t",
        }))
        .await
        .expect("event created");

        let events = calendar.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].end - events[0].start).num_minutes(), 60);
    }

    #[tokio::test]
    async fn calendar_tools_require_a_token() {
        let (deps, _, _) = deps();
        let tool = default_catalog(deps).get("list_calendar_events").expect("registered");
        let error = tool
            .execute(json!({"from": "2026-03-16T00:00:00", "to": "2026-03-17T00:00:00"}))
            .await
            .expect_err("token missing");
        assert!(error.to_string().contains("re-authenticate"));
    }

    #[tokio::test]
    async fn bare_times_are_rejected_with_a_message() {
        let (deps, _, _) = deps();
        let tool = default_catalog(deps).get("add_reminder").expect("registered");
        let error = tool
            .execute(json!({"title": "stretch", "remind_at": "15:00", "user_id": "u-1"}))
            .await
            .expect_err("bare time is not absolute");
        assert!(error.to_string().contains("remind_at"));
    }

    #[tokio::test]
    async fn add_todo_and_list_todos_share_the_store() {
        let (deps, _, todos) = deps();
        let catalog = default_catalog(deps);
        let add = catalog.get("add_todo").expect("registered");
        add.execute(json!({"title": "Review budget", "due_date": "2026-03-20", "user_id": "u-1"}))
            .await
            .expect("todo added");

        let stored = todos.query("u-1", TodoQuery::default()).await.expect("query");
        assert_eq!(stored.len(), 1);

        let listed = catalog
            .get("list_todos")
            .expect("registered")
            .execute(json!({"user_id": "u-1"}))
            .await
            .expect("listed");
        assert_eq!(listed["count"], 1);
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported() {
        let (deps, _, _) = deps();
        let tool = default_catalog(deps).get("add_todo").expect("registered");
        let error = tool.execute(json!({"due_date": 5})).await.expect_err("bad args");
        assert!(error.to_string().contains("invalid arguments for add_todo"));
    }
}
