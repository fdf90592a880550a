//! Side effects for accepted drafts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use tempra_core::domain::draft::{
    EmailAction, EmailDraft, GoalDraft, ReminderDraft, ScheduleDraft, ScheduleOperation, TodoDraft,
};
use tempra_core::domain::timestamp::utc_offset;
use tempra_core::providers::{
    CalendarEvent, CalendarProvider, CredentialProvider, EmailProvider, EventUpdate, GoalPlan,
    NewEvent, NewTodo, OutgoingEmail, PlanStore, PlanWeek, TodoKind, TodoStore,
};
use tempra_core::{ApplicationError, ChatMessage, Draft, ProviderError, UserIdentity};
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_object;

pub const PLAN_FAILURE_MESSAGE: &str = "Sorry, I couldn't generate a plan.";

/// How far around "now" an edit or deletion looks for its event when no start is known.
const TARGET_LOOKBACK_DAYS: i64 = 1;
const TARGET_LOOKAHEAD_DAYS: i64 = 60;
/// Half-width of the search window around a known start.
const TARGET_SLACK_HOURS: i64 = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { message: String },
    /// Credentials were missing, expired or rejected by the provider.
    Reauthenticate { message: String },
    Failed { message: String },
}

impl CommitOutcome {
    pub fn message(&self) -> &str {
        match self {
            Self::Committed { message } | Self::Reauthenticate { message } | Self::Failed { message } => {
                message
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    fn from_error(error: ApplicationError) -> Self {
        let message = error.user_message().to_owned();
        if error.requires_reauthentication() {
            Self::Reauthenticate { message }
        } else {
            Self::Failed { message }
        }
    }
}

/// Collaborators used by the commit handlers. Constructed once and shared.
#[derive(Clone)]
pub struct CommitDeps {
    pub calendar: Arc<dyn CalendarProvider>,
    pub email: Arc<dyn EmailProvider>,
    pub todos: Arc<dyn TodoStore>,
    pub plans: Arc<dyn PlanStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub gateway: Arc<dyn CompletionGateway>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitSettings {
    pub provider_timeout: Duration,
    pub gateway_timeout: Duration,
    pub default_event_length: Duration,
    pub local_offset: FixedOffset,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(20),
            gateway_timeout: Duration::from_secs(30),
            default_event_length: Duration::from_secs(60 * 60),
            local_offset: utc_offset(0),
        }
    }
}

/// Result of looking up the event an edit or deletion refers to.
#[derive(Clone, Debug, PartialEq)]
enum TargetMatch {
    Found(CalendarEvent),
    Missing,
    Ambiguous(usize),
}

pub struct ActionCommitter {
    deps: CommitDeps,
    settings: CommitSettings,
}

impl ActionCommitter {
    pub fn new(deps: CommitDeps, settings: CommitSettings) -> Self {
        Self { deps, settings }
    }

    /// Performs the effect for a ready draft. Never panics on missing slots.
    pub async fn commit(&self, draft: &Draft, user: &UserIdentity) -> CommitOutcome {
        let result = match draft {
            Draft::Schedule(schedule) => self.schedule(schedule, user).await,
            Draft::Email(email) => self.email(email, user).await,
            Draft::Remind(reminder) => self.remind(reminder, user).await,
            Draft::Todo(todo) => self.todo(todo, user).await,
            Draft::Goal(goal) => self.goal(goal, user).await,
        };

        match result {
            Ok(outcome) => {
                info!(
                    event_name = "commit.applied",
                    intent = %draft.intent(),
                    user_id = %user.user_id,
                    committed = outcome.is_committed(),
                    "applied accepted draft"
                );
                outcome
            }
            Err(error) => {
                warn!(
                    event_name = "commit.failed",
                    intent = %draft.intent(),
                    user_id = %user.user_id,
                    error = %error,
                    "accepted draft could not be applied"
                );
                CommitOutcome::from_error(error)
            }
        }
    }

    async fn access_token(&self, user: &UserIdentity) -> Result<SecretString, ApplicationError> {
        let credentials = self.deps.credentials.get_credentials(&user.user_id).await?;
        Ok(credentials.access_token)
    }

    async fn call<T, F>(&self, future: F) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.settings.provider_timeout, future).await {
            Ok(result) => result.map_err(ApplicationError::from),
            Err(_) => Err(ProviderError::Timeout {
                after_secs: self.settings.provider_timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn schedule(
        &self,
        draft: &ScheduleDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        match draft.operation {
            ScheduleOperation::Add => self.add_event(draft, user).await,
            ScheduleOperation::Edit => self.edit_event(draft, user).await,
            ScheduleOperation::Delete => self.delete_event(draft, user).await,
        }
    }

    async fn add_event(
        &self,
        draft: &ScheduleDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let (Some(title), Some(start)) = (draft.title.clone(), draft.start_time) else {
            return Err(incomplete("schedule"));
        };
        let end = match draft.end_time {
            Some(end) => end,
            None => {
                start
                    + chrono::Duration::from_std(self.settings.default_event_length)
                        .map_err(|error| ApplicationError::Configuration(error.to_string()))?
            }
        };

        let token = self.access_token(user).await?;
        let event = NewEvent { title, start, end, attendees: draft.attendees.clone() };
        let created = self.call(self.deps.calendar.insert_event(&token, event)).await?;

        let mut message = format!(
            "Scheduled \"{}\" for {}.",
            created.title,
            created.start.format("%A %B %-d at %H:%M")
        );
        if let Some(link) = created.link {
            message.push_str(&format!(" Link: {link}"));
        }
        Ok(CommitOutcome::Committed { message })
    }

    async fn edit_event(
        &self,
        draft: &ScheduleDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let Some(target) = draft.target.as_deref().filter(|_| draft.has_changes()) else {
            return Err(incomplete("event change"));
        };

        let token = self.access_token(user).await?;
        let event = match self.find_target(&token, target, draft.target_start).await? {
            TargetMatch::Found(event) => event,
            unresolved => return Ok(unresolved_target(target, &unresolved)),
        };

        // A moved start without a new end keeps the event's length.
        let end = match (draft.start_time, draft.end_time) {
            (_, Some(end)) => Some(end),
            (Some(start), None) => Some(start + (event.end - event.start)),
            (None, None) => None,
        };
        let update = EventUpdate {
            title: draft.title.clone(),
            start: draft.start_time,
            end,
            attendees: (!draft.attendees.is_empty()).then(|| draft.attendees.clone()),
        };
        let updated = self.call(self.deps.calendar.update_event(&token, &event.id, update)).await?;

        Ok(CommitOutcome::Committed {
            message: format!(
                "Updated \"{}\": now {}.",
                updated.title,
                updated.start.format("%A %B %-d at %H:%M")
            ),
        })
    }

    async fn delete_event(
        &self,
        draft: &ScheduleDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let Some(target) = draft.target.as_deref() else {
            return Err(incomplete("event deletion"));
        };

        let token = self.access_token(user).await?;
        let event = match self.find_target(&token, target, draft.target_start).await? {
            TargetMatch::Found(event) => event,
            unresolved => return Ok(unresolved_target(target, &unresolved)),
        };
        self.call(self.deps.calendar.delete_event(&token, &event.id)).await?;

        Ok(CommitOutcome::Committed {
            message: format!(
                "Deleted \"{}\" on {}.",
                event.title,
                event.start.format("%A %B %-d at %H:%M")
            ),
        })
    }

    async fn find_target(
        &self,
        token: &SecretString,
        target: &str,
        at: Option<DateTime<FixedOffset>>,
    ) -> Result<TargetMatch, ApplicationError> {
        let (from, to) = match at {
            Some(at) => (
                at - chrono::Duration::hours(TARGET_SLACK_HOURS),
                at + chrono::Duration::hours(TARGET_SLACK_HOURS),
            ),
            None => {
                let now = Utc::now().with_timezone(&self.settings.local_offset);
                (
                    now - chrono::Duration::days(TARGET_LOOKBACK_DAYS),
                    now + chrono::Duration::days(TARGET_LOOKAHEAD_DAYS),
                )
            }
        };
        let events = self.call(self.deps.calendar.list_events(token, from, to)).await?;
        Ok(pick_target(events, target, at))
    }

    async fn email(
        &self,
        draft: &EmailDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let (Some(recipient), Some(subject), Some(body)) =
            (draft.recipient.clone(), draft.subject.clone(), draft.body.clone())
        else {
            return Err(incomplete("email"));
        };

        let token = self.access_token(user).await?;
        let email = OutgoingEmail {
            recipient: recipient.clone(),
            subject,
            body,
            attachments: draft.attachments.clone(),
            folder: draft.folder.clone(),
            priority: draft.priority,
        };

        let message = match draft.action.unwrap_or(EmailAction::Send) {
            EmailAction::Send => {
                self.call(self.deps.email.send_email(&token, email)).await?;
                format!("Email sent to {recipient}.")
            }
            EmailAction::Draft => {
                self.call(self.deps.email.create_draft(&token, email)).await?;
                format!("Draft to {recipient} saved.")
            }
        };
        Ok(CommitOutcome::Committed { message })
    }

    async fn remind(
        &self,
        draft: &ReminderDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let (Some(title), Some(due_at)) = (draft.title.clone(), draft.due_at) else {
            return Err(incomplete("reminder"));
        };
        let title = match draft.notes.as_deref() {
            Some(notes) => format!("{title}: {notes}"),
            None => title,
        };

        let item = self
            .call(self.deps.todos.append(NewTodo {
                user_id: user.user_id.clone(),
                title,
                due_date: Some(due_at.date_naive()),
                remind_at: Some(due_at),
                kind: TodoKind::Reminder,
            }))
            .await?;

        Ok(CommitOutcome::Committed {
            message: format!(
                "Reminder set: {} on {}.",
                item.title,
                due_at.format("%A %B %-d at %H:%M")
            ),
        })
    }

    async fn todo(
        &self,
        draft: &TodoDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let Some(title) = draft.title.clone() else {
            return Err(incomplete("todo"));
        };

        let item = self
            .call(self.deps.todos.append(NewTodo {
                user_id: user.user_id.clone(),
                title,
                due_date: draft.due_date,
                remind_at: None,
                kind: TodoKind::Task,
            }))
            .await?;

        let message = match item.due_date {
            Some(due) => format!("Added to your todo list: {} (due {}).", item.title, due.format("%Y-%m-%d")),
            None => format!("Added to your todo list: {}.", item.title),
        };
        Ok(CommitOutcome::Committed { message })
    }

    async fn goal(
        &self,
        draft: &GoalDraft,
        user: &UserIdentity,
    ) -> Result<CommitOutcome, ApplicationError> {
        let (Some(goal), Some(weeks), Some(around_calendar)) =
            (draft.goal.clone(), draft.duration_weeks, draft.build_around_calendar)
        else {
            return Err(incomplete("goal"));
        };

        let request = CompletionRequest::new(plan_prompt(&goal, weeks, around_calendar))
            .with_max_tokens(900)
            .with_temperature(0.4);
        let reply =
            complete_within(self.deps.gateway.as_ref(), request, self.settings.gateway_timeout).await?;

        let Some(plan) = parse_plan(&reply) else {
            warn!(event_name = "commit.goal.unparseable", goal = %goal, "plan reply was not usable");
            return Ok(CommitOutcome::Failed { message: PLAN_FAILURE_MESSAGE.to_owned() });
        };

        let summary = plan
            .weeks
            .iter()
            .map(|week| {
                format!(
                    "Week {}: {} (Notifications: {})",
                    week.week,
                    week.tasks.join(", "),
                    week.notifications.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let stored = GoalPlan {
            id: Uuid::new_v4().to_string(),
            user_id: user.user_id.clone(),
            goal: goal.clone(),
            duration_weeks: weeks,
            build_around_calendar: around_calendar,
            subtasks: plan.subtasks,
            weeks: plan.weeks,
            created_at: Utc::now(),
        };
        self.call(self.deps.plans.save_plan(stored)).await?;

        Ok(CommitOutcome::Committed {
            message: format!("Here is your {weeks}-week plan for \"{goal}\":\n{summary}"),
        })
    }
}

/// Picks the one event whose title matches `target`. A known start narrows ties and
/// stands in when no title matches.
fn pick_target(
    events: Vec<CalendarEvent>,
    target: &str,
    at: Option<DateTime<FixedOffset>>,
) -> TargetMatch {
    let needle = target.trim().to_lowercase();
    let (mut matches, others): (Vec<CalendarEvent>, Vec<CalendarEvent>) =
        events.into_iter().partition(|event| {
            let title = event.title.trim().to_lowercase();
            !title.is_empty() && (title.contains(&needle) || needle.contains(&title))
        });

    if let Some(at) = at {
        if matches.is_empty() {
            matches = others.into_iter().filter(|event| event.start == at).collect();
        } else if matches.len() > 1 {
            matches.retain(|event| event.start == at);
        }
    }

    match matches.len() {
        0 => TargetMatch::Missing,
        1 => matches.pop().map_or(TargetMatch::Missing, TargetMatch::Found),
        count => TargetMatch::Ambiguous(count),
    }
}

fn unresolved_target(target: &str, unresolved: &TargetMatch) -> CommitOutcome {
    let message = match unresolved {
        TargetMatch::Ambiguous(count) => format!(
            "\"{target}\" matches {count} events. Tell me the date and time of the one you mean."
        ),
        TargetMatch::Found(_) | TargetMatch::Missing => {
            format!("I couldn't find an event matching \"{target}\" on your calendar.")
        }
    };
    CommitOutcome::Failed { message }
}

fn incomplete(kind: &str) -> ApplicationError {
    ApplicationError::Domain(tempra_core::DomainError::InvariantViolation(format!(
        "{kind} draft accepted with required fields missing"
    )))
}

fn plan_prompt(goal: &str, weeks: u32, around_calendar: bool) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are a productivity assistant. Given a goal, a duration in weeks, and whether to build \
             around a calendar, break the goal into actionable subtasks and build a week-by-week plan. \
             For each week list the subtasks to complete and suggest reminder notification times. \
             If building around a calendar, spread tasks to avoid a typical workweek's busy hours.\n\
             Reply ONLY with JSON of the form {\"subtasks\": [\"...\"], \"plan\": [{\"week\": 1, \
             \"tasks\": [\"...\"], \"notifications\": [\"Monday 9am\"]}]}",
        ),
        ChatMessage::user(format!(
            "Goal: {goal}\nDuration: {weeks} weeks\nBuild around calendar: {around_calendar}"
        )),
    ]
}

#[derive(Debug, PartialEq)]
struct ParsedPlan {
    subtasks: Vec<String>,
    weeks: Vec<PlanWeek>,
}

#[derive(Deserialize)]
struct PlanReply {
    #[serde(default)]
    subtasks: Vec<String>,
    #[serde(default)]
    plan: Vec<PlanWeekReply>,
}

#[derive(Deserialize)]
struct PlanWeekReply {
    week: Option<u32>,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    notifications: Vec<String>,
}

fn parse_plan(raw: &str) -> Option<ParsedPlan> {
    let object = parse_object(raw)?;
    let reply: PlanReply = serde_json::from_value(Value::Object(object)).ok()?;
    if reply.plan.is_empty() {
        return None;
    }

    let weeks = reply
        .plan
        .into_iter()
        .enumerate()
        .map(|(index, week)| PlanWeek {
            week: week.week.unwrap_or(index as u32 + 1),
            tasks: week.tasks,
            notifications: week.notifications,
        })
        .collect();
    Some(ParsedPlan { subtasks: reply.subtasks, weeks })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use secrecy::SecretString;
    use tempra_core::domain::draft::{
        EmailAction, EmailDraft, GoalDraft, ScheduleDraft, ScheduleOperation, TodoDraft,
    };
    use tempra_core::providers::{
        CalendarEvent, CalendarProvider, InMemoryCalendar, InMemoryMailbox, NewEvent, PlanStore,
        StaticCredentialProvider, TodoKind, TodoQuery, TodoStore,
    };
    use tempra_core::{Draft, UserIdentity};
    use tempra_db::{InMemoryPlanStore, InMemoryTodoStore};

    use super::{
        parse_plan, pick_target, ActionCommitter, CommitDeps, CommitOutcome, CommitSettings,
        TargetMatch,
    };
    use crate::llm::ScriptedGateway;

    struct Harness {
        committer: ActionCommitter,
        calendar: InMemoryCalendar,
        mailbox: InMemoryMailbox,
        todos: InMemoryTodoStore,
        plans: InMemoryPlanStore,
    }

    fn harness(credentials: StaticCredentialProvider, gateway: ScriptedGateway) -> Harness {
        let calendar = InMemoryCalendar::default();
        let mailbox = InMemoryMailbox::default();
        let todos = InMemoryTodoStore::default();
        let plans = InMemoryPlanStore::default();
        let deps = CommitDeps {
            calendar: Arc::new(calendar.clone()),
            email: Arc::new(mailbox.clone()),
            todos: Arc::new(todos.clone()),
            plans: Arc::new(plans.clone()),
            credentials: Arc::new(credentials),
            gateway: Arc::new(gateway),
        };
        Harness {
            committer: ActionCommitter::new(deps, CommitSettings::default()),
            calendar,
            mailbox,
            todos,
            plans,
        }
    }

    fn with_token() -> StaticCredentialProvider {
        StaticCredentialProvider::default().with_user("u-1", "token")
    }

    #[tokio::test]
    async fn schedule_commit_inserts_one_hour_event() {
        let h = harness(with_token(), ScriptedGateway::default());
        let draft = Draft::Schedule(ScheduleDraft {
            title: Some("Lunch with Sam".to_owned()),
            start_time: Some(DateTime::parse_from_rfc3339("2026-03-16T12:00:00+00:00").expect("ts")),
            ..ScheduleDraft::default()
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(outcome.is_committed(), "{outcome:?}");
        assert!(outcome.message().contains("Lunch with Sam"));

        let events = h.calendar.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].end - events[0].start).num_minutes(), 60);
    }

    fn at(value: &str) -> DateTime<chrono::FixedOffset> {
        DateTime::parse_from_rfc3339(value).expect("timestamp")
    }

    async fn seed_event(calendar: &InMemoryCalendar, title: &str, start: &str) -> CalendarEvent {
        let start = at(start);
        calendar
            .insert_event(
                &SecretString::from("token".to_owned()),
                NewEvent {
                    title: title.to_owned(),
                    start,
                    end: start + chrono::Duration::minutes(30),
                    attendees: vec![],
                },
            )
            .await
            .expect("seeded")
    }

    fn in_days(days: i64, hour: u32) -> String {
        let day = (chrono::Utc::now() + chrono::Duration::days(days)).date_naive();
        format!("{}T{hour:02}:00:00+00:00", day.format("%Y-%m-%d"))
    }

    #[tokio::test]
    async fn edit_moves_the_matching_event_and_keeps_its_length() {
        let h = harness(with_token(), ScriptedGateway::default());
        let lunch = seed_event(&h.calendar, "Lunch with Sam", &in_days(2, 12)).await;
        seed_event(&h.calendar, "Standup", &in_days(2, 9)).await;

        let draft = Draft::Schedule(ScheduleDraft {
            target: Some("lunch".to_owned()),
            start_time: Some(at(&in_days(3, 13))),
            ..ScheduleDraft::for_operation(ScheduleOperation::Edit)
        });
        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(outcome.is_committed(), "{outcome:?}");
        assert!(outcome.message().starts_with("Updated \"Lunch with Sam\""));

        let events = h.calendar.events().await;
        let moved = events.iter().find(|event| event.id == lunch.id).expect("still there");
        assert_eq!(moved.start, at(&in_days(3, 13)));
        assert_eq!((moved.end - moved.start).num_minutes(), 30);
    }

    #[tokio::test]
    async fn delete_removes_only_the_named_event() {
        let h = harness(with_token(), ScriptedGateway::default());
        seed_event(&h.calendar, "Dentist", &in_days(1, 15)).await;
        seed_event(&h.calendar, "Standup", &in_days(1, 9)).await;

        let draft = Draft::Schedule(ScheduleDraft {
            target: Some("Dentist".to_owned()),
            ..ScheduleDraft::for_operation(ScheduleOperation::Delete)
        });
        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(outcome.message().starts_with("Deleted \"Dentist\""), "{outcome:?}");

        let remaining: Vec<String> =
            h.calendar.events().await.into_iter().map(|event| event.title).collect();
        assert_eq!(remaining, vec!["Standup".to_owned()]);
    }

    #[tokio::test]
    async fn unresolved_targets_fail_without_touching_the_calendar() {
        let h = harness(with_token(), ScriptedGateway::default());
        seed_event(&h.calendar, "Team sync", &in_days(1, 10)).await;
        seed_event(&h.calendar, "Team sync", &in_days(2, 10)).await;

        let delete = |target: &str| {
            Draft::Schedule(ScheduleDraft {
                target: Some(target.to_owned()),
                ..ScheduleDraft::for_operation(ScheduleOperation::Delete)
            })
        };
        let user = UserIdentity::new("u-1");

        let missing = h.committer.commit(&delete("Dentist"), &user).await;
        assert_eq!(
            missing,
            CommitOutcome::Failed {
                message: "I couldn't find an event matching \"Dentist\" on your calendar.".to_owned()
            }
        );
        let ambiguous = h.committer.commit(&delete("team sync"), &user).await;
        assert!(matches!(ambiguous, CommitOutcome::Failed { ref message } if message.contains("matches 2 events")));
        assert_eq!(h.calendar.events().await.len(), 2);
    }

    #[test]
    fn known_start_breaks_ties_and_stands_in_for_the_title() {
        let event = |id: &str, title: &str, start: &str| CalendarEvent {
            id: id.to_owned(),
            title: title.to_owned(),
            start: at(start),
            end: at(start) + chrono::Duration::hours(1),
            attendees: vec![],
            link: None,
        };
        let events = vec![
            event("a", "Team sync", "2026-03-16T10:00:00+00:00"),
            event("b", "Team sync", "2026-03-17T10:00:00+00:00"),
            event("c", "Lunch with Sam", "2026-03-16T12:00:00+00:00"),
        ];

        let tie = pick_target(events.clone(), "team sync", Some(at("2026-03-17T10:00:00+00:00")));
        assert!(matches!(tie, TargetMatch::Found(ref found) if found.id == "b"));

        let by_time = pick_target(events.clone(), "my noon meeting", Some(at("2026-03-16T12:00:00+00:00")));
        assert!(matches!(by_time, TargetMatch::Found(ref found) if found.id == "c"));

        assert_eq!(pick_target(events, "team sync", None), TargetMatch::Ambiguous(2));
    }

    #[tokio::test]
    async fn missing_credentials_ask_for_reauthentication() {
        let h = harness(StaticCredentialProvider::default().with_revoked("u-1"), ScriptedGateway::default());
        let draft = Draft::Email(EmailDraft {
            recipient: Some("sam@example.com".to_owned()),
            subject: Some("Hi".to_owned()),
            body: Some("Hello".to_owned()),
            ..EmailDraft::default()
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(matches!(outcome, CommitOutcome::Reauthenticate { .. }));
        assert!(h.mailbox.sent().await.is_empty());
    }

    #[tokio::test]
    async fn email_draft_action_saves_without_sending() {
        let h = harness(with_token(), ScriptedGateway::default());
        let draft = Draft::Email(EmailDraft {
            recipient: Some("sam@example.com".to_owned()),
            subject: Some("Hi".to_owned()),
            body: Some("Hello".to_owned()),
            action: Some(EmailAction::Draft),
            ..EmailDraft::default()
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert_eq!(outcome.message(), "Draft to sam@example.com saved.");
        assert_eq!(h.mailbox.drafts().await.len(), 1);
        assert!(h.mailbox.sent().await.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_reported_not_raised() {
        let h = harness(with_token(), ScriptedGateway::default());
        let draft = Draft::Email(EmailDraft {
            recipient: Some("not-an-address".to_owned()),
            subject: Some("Hi".to_owned()),
            body: Some("Hello".to_owned()),
            ..EmailDraft::default()
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(matches!(outcome, CommitOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn todo_commit_needs_no_credentials() {
        let h = harness(StaticCredentialProvider::default(), ScriptedGateway::default());
        let draft = Draft::Todo(TodoDraft { title: Some("Buy milk".to_owned()), due_date: None });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert_eq!(outcome.message(), "Added to your todo list: Buy milk.");

        let items = h.todos.query("u-1", TodoQuery::default()).await.expect("query");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, TodoKind::Task);
    }

    #[tokio::test]
    async fn goal_commit_persists_the_generated_plan() {
        let gateway = ScriptedGateway::new([r#"```json
        {"subtasks": ["Run 5k", "Run 10k"],
         "plan": [
            {"week": 1, "tasks": ["Run 5k"], "notifications": ["Monday 7am"]},
            {"week": 2, "tasks": ["Run 10k"], "notifications": ["Saturday 8am"]}
         ]}
        ```"#]);
        let h = harness(StaticCredentialProvider::default(), gateway);
        let draft = Draft::Goal(GoalDraft {
            goal: Some("Run a 10k".to_owned()),
            duration_weeks: Some(2),
            build_around_calendar: Some(false),
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert!(outcome.is_committed());
        assert!(outcome.message().contains("Week 2: Run 10k (Notifications: Saturday 8am)"));

        let plans = h.plans.list_plans("u-1").await.expect("plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].subtasks.len(), 2);
    }

    #[tokio::test]
    async fn unusable_plan_is_a_failure() {
        let h = harness(StaticCredentialProvider::default(), ScriptedGateway::new(["no plan today"]));
        let draft = Draft::Goal(GoalDraft {
            goal: Some("Learn Spanish".to_owned()),
            duration_weeks: Some(4),
            build_around_calendar: Some(true),
        });

        let outcome = h.committer.commit(&draft, &UserIdentity::new("u-1")).await;
        assert_eq!(outcome, CommitOutcome::Failed { message: "Sorry, I couldn't generate a plan.".to_owned() });
        assert!(h.plans.list_plans("u-1").await.expect("plans").is_empty());
    }

    #[test]
    fn plan_weeks_default_to_their_position() {
        let plan = parse_plan(r#"{"plan": [{"tasks": ["a"]}, {"tasks": ["b"]}]}"#).expect("plan");
        assert_eq!(plan.weeks[1].week, 2);
        assert!(parse_plan(r#"{"plan": []}"#).is_none());
    }
}
