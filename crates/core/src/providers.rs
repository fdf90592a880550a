//! Collaborator boundaries for calendar, email, todo, plan and credential services.
//!
//! Concrete vendor integrations live outside this workspace. The in-memory
//! implementations here back the operator sandbox and the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::draft::EmailPriority;
use crate::errors::{CredentialError, ProviderError};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self { access_token: SecretString::from(access_token.into()), refresh_token: None }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, user_id: &str) -> Result<Credentials, CredentialError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attendees: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attendees: Vec<String>,
    pub link: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub attendees: Option<Vec<String>>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn insert_event(
        &self,
        token: &SecretString,
        event: NewEvent,
    ) -> Result<CalendarEvent, ProviderError>;
    async fn update_event(
        &self,
        token: &SecretString,
        event_id: &str,
        update: EventUpdate,
    ) -> Result<CalendarEvent, ProviderError>;
    async fn delete_event(&self, token: &SecretString, event_id: &str)
        -> Result<(), ProviderError>;
    async fn list_events(
        &self,
        token: &SecretString,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<String>,
    pub folder: Option<String>,
    pub priority: Option<EmailPriority>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Sends immediately and returns the provider message id.
    async fn send_email(
        &self,
        token: &SecretString,
        email: OutgoingEmail,
    ) -> Result<String, ProviderError>;
    /// Saves without sending and returns the provider draft id.
    async fn create_draft(
        &self,
        token: &SecretString,
        email: OutgoingEmail,
    ) -> Result<String, ProviderError>;
    async fn search_emails(
        &self,
        token: &SecretString,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailSummary>, ProviderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoKind {
    Task,
    Reminder,
}

impl TodoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Reminder => "reminder",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTodo {
    pub user_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub remind_at: Option<DateTime<FixedOffset>>,
    pub kind: TodoKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub remind_at: Option<DateTime<FixedOffset>>,
    pub kind: TodoKind,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl TodoItem {
    pub fn from_new(todo: NewTodo) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: todo.user_id,
            title: todo.title,
            due_date: todo.due_date,
            remind_at: todo.remind_at,
            kind: todo.kind,
            completed: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TodoQuery {
    pub include_completed: bool,
    pub kind: Option<TodoKind>,
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn append(&self, todo: NewTodo) -> Result<TodoItem, ProviderError>;
    async fn query(&self, user_id: &str, query: TodoQuery) -> Result<Vec<TodoItem>, ProviderError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWeek {
    pub week: u32,
    pub tasks: Vec<String>,
    pub notifications: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalPlan {
    pub id: String,
    pub user_id: String,
    pub goal: String,
    pub duration_weeks: u32,
    pub build_around_calendar: bool,
    pub subtasks: Vec<String>,
    pub weeks: Vec<PlanWeek>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn save_plan(&self, plan: GoalPlan) -> Result<(), ProviderError>;
    async fn list_plans(&self, user_id: &str) -> Result<Vec<GoalPlan>, ProviderError>;
}

/// Hands out the same token for every user, or per-user tokens when configured.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialProvider {
    shared: Option<SecretString>,
    per_user: HashMap<String, SecretString>,
    revoked: Vec<String>,
}

impl StaticCredentialProvider {
    pub fn shared(token: Option<SecretString>) -> Self {
        Self { shared: token, ..Self::default() }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.per_user.insert(user_id.into(), SecretString::from(token.into()));
        self
    }

    pub fn with_revoked(mut self, user_id: impl Into<String>) -> Self {
        self.revoked.push(user_id.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self, user_id: &str) -> Result<Credentials, CredentialError> {
        if self.revoked.iter().any(|revoked| revoked == user_id) {
            return Err(CredentialError::Revoked { user_id: user_id.to_owned() });
        }

        self.per_user
            .get(user_id)
            .or(self.shared.as_ref())
            .map(|token| Credentials { access_token: token.clone(), refresh_token: None })
            .ok_or_else(|| CredentialError::NotFound { user_id: user_id.to_owned() })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCalendar {
    events: Arc<RwLock<Vec<CalendarEvent>>>,
}

impl InMemoryCalendar {
    pub async fn events(&self) -> Vec<CalendarEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl CalendarProvider for InMemoryCalendar {
    async fn insert_event(
        &self,
        _token: &SecretString,
        event: NewEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        if event.end < event.start {
            return Err(ProviderError::Failed("event ends before it starts".to_owned()));
        }

        let id = Uuid::new_v4().to_string();
        let stored = CalendarEvent {
            link: Some(format!("local://calendar/{id}")),
            id,
            title: event.title,
            start: event.start,
            end: event.end,
            attendees: event.attendees,
        };
        self.events.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn update_event(
        &self,
        _token: &SecretString,
        event_id: &str,
        update: EventUpdate,
    ) -> Result<CalendarEvent, ProviderError> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|event| event.id == event_id)
            .ok_or_else(|| ProviderError::NotFound(format!("event {event_id}")))?;

        if let Some(title) = update.title {
            event.title = title;
        }
        if let Some(start) = update.start {
            event.start = start;
        }
        if let Some(end) = update.end {
            event.end = end;
        }
        if let Some(attendees) = update.attendees {
            event.attendees = attendees;
        }
        Ok(event.clone())
    }

    async fn delete_event(
        &self,
        _token: &SecretString,
        event_id: &str,
    ) -> Result<(), ProviderError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|event| event.id != event_id);
        if events.len() == before {
            return Err(ProviderError::NotFound(format!("event {event_id}")));
        }
        Ok(())
    }

    async fn list_events(
        &self,
        _token: &SecretString,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let mut matching: Vec<CalendarEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.end > from && event.start < to)
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.start);
        Ok(matching)
    }
}

#[derive(Clone, Debug, Default)]
struct MailboxState {
    inbox: Vec<EmailSummary>,
    sent: Vec<OutgoingEmail>,
    drafts: Vec<OutgoingEmail>,
    searches: Vec<String>,
}

#[derive(Clone, Default)]
pub struct InMemoryMailbox {
    state: Arc<RwLock<MailboxState>>,
}

impl InMemoryMailbox {
    pub async fn seed_inbox(&self, messages: impl IntoIterator<Item = EmailSummary>) {
        self.state.write().await.inbox.extend(messages);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.state.read().await.sent.clone()
    }

    pub async fn drafts(&self) -> Vec<OutgoingEmail> {
        self.state.read().await.drafts.clone()
    }

    pub async fn searches(&self) -> Vec<String> {
        self.state.read().await.searches.clone()
    }
}

#[async_trait]
impl EmailProvider for InMemoryMailbox {
    async fn send_email(
        &self,
        _token: &SecretString,
        email: OutgoingEmail,
    ) -> Result<String, ProviderError> {
        if !email.recipient.contains('@') {
            return Err(ProviderError::Failed(format!(
                "invalid recipient address `{}`",
                email.recipient
            )));
        }
        self.state.write().await.sent.push(email);
        Ok(Uuid::new_v4().to_string())
    }

    async fn create_draft(
        &self,
        _token: &SecretString,
        email: OutgoingEmail,
    ) -> Result<String, ProviderError> {
        self.state.write().await.drafts.push(email);
        Ok(Uuid::new_v4().to_string())
    }

    async fn search_emails(
        &self,
        _token: &SecretString,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailSummary>, ProviderError> {
        let mut state = self.state.write().await;
        state.searches.push(query.to_owned());

        let needle = query.to_lowercase();
        Ok(state
            .inbox
            .iter()
            .filter(|message| {
                needle.is_empty()
                    || message.subject.to_lowercase().contains(&needle)
                    || message.snippet.to_lowercase().contains(&needle)
                    || message.from.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset};
    use secrecy::{ExposeSecret, SecretString};

    use super::{
        CalendarProvider, CredentialProvider, EmailProvider, EmailSummary, EventUpdate,
        InMemoryCalendar, InMemoryMailbox, NewEvent, OutgoingEmail, StaticCredentialProvider,
    };
    use crate::errors::{CredentialError, ProviderError};

    fn token() -> SecretString {
        SecretString::from("token".to_owned())
    }

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).expect("valid timestamp")
    }

    #[tokio::test]
    async fn static_credentials_prefer_per_user_tokens() {
        let provider = StaticCredentialProvider::shared(Some(SecretString::from("shared".to_owned())))
            .with_user("alice", "alice-token")
            .with_revoked("mallory");

        let alice = provider.get_credentials("alice").await.expect("alice has a token");
        assert_eq!(alice.access_token.expose_secret(), "alice-token");

        let bob = provider.get_credentials("bob").await.expect("bob uses the shared token");
        assert_eq!(bob.access_token.expose_secret(), "shared");

        let revoked = provider.get_credentials("mallory").await.expect_err("revoked");
        assert!(matches!(revoked, CredentialError::Revoked { .. }));

        let missing = StaticCredentialProvider::default().get_credentials("bob").await;
        assert!(matches!(missing, Err(CredentialError::NotFound { .. })));
    }

    #[tokio::test]
    async fn calendar_round_trips_insert_update_list_delete() {
        let calendar = InMemoryCalendar::default();
        let start = at("2026-03-15T12:00:00+00:00");
        let event = calendar
            .insert_event(
                &token(),
                NewEvent {
                    title: "Lunch".to_owned(),
                    start,
                    end: start + Duration::hours(1),
                    attendees: vec![],
                },
            )
            .await
            .expect("insert");

        let updated = calendar
            .update_event(
                &token(),
                &event.id,
                EventUpdate { title: Some("Lunch with Sam".to_owned()), ..EventUpdate::default() },
            )
            .await
            .expect("update");
        assert_eq!(updated.title, "Lunch with Sam");

        let listed = calendar
            .list_events(&token(), start - Duration::days(1), start + Duration::days(1))
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);

        calendar.delete_event(&token(), &event.id).await.expect("delete");
        let missing = calendar.delete_event(&token(), &event.id).await;
        assert!(matches!(missing, Err(ProviderError::NotFound(_))));
    }

    #[tokio::test]
    async fn mailbox_search_matches_subject_and_records_query() {
        let mailbox = InMemoryMailbox::default();
        mailbox
            .seed_inbox([
                EmailSummary {
                    id: "m-1".to_owned(),
                    from: "cfo@example.com".to_owned(),
                    subject: "Budget review".to_owned(),
                    snippet: "numbers attached".to_owned(),
                },
                EmailSummary {
                    id: "m-2".to_owned(),
                    from: "friend@example.com".to_owned(),
                    subject: "Dinner".to_owned(),
                    snippet: "friday?".to_owned(),
                },
            ])
            .await;

        let found = mailbox.search_emails(&token(), "budget", 10).await.expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m-1");
        assert_eq!(mailbox.searches().await, vec!["budget".to_owned()]);
    }

    #[tokio::test]
    async fn mailbox_rejects_invalid_recipient() {
        let mailbox = InMemoryMailbox::default();
        let email = OutgoingEmail {
            recipient: "not-an-address".to_owned(),
            subject: "Hi".to_owned(),
            body: "Hello".to_owned(),
            attachments: vec![],
            folder: None,
            priority: None,
        };

        assert!(mailbox.send_email(&token(), email.clone()).await.is_err());
        assert!(mailbox.create_draft(&token(), email).await.is_ok());
        assert_eq!(mailbox.drafts().await.len(), 1);
        assert!(mailbox.sent().await.is_empty());
    }
}
