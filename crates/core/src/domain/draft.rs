use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::intent::IntentLabel;
use crate::domain::timestamp::{normalize_date, normalize_datetime};
use crate::errors::DomainError;

/// One slot of an intent's draft.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DraftField {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub required: bool,
}

const fn field(
    name: &'static str,
    label: &'static str,
    description: &'static str,
    required: bool,
) -> DraftField {
    DraftField { name, label, description, required }
}

const SCHEDULE_FIELDS: [DraftField; 4] = [
    field("title", "Title", "short title of the event", true),
    field(
        "start_time",
        "Start",
        "ISO 8601 date-time including the calendar date, e.g. 2026-03-15T12:00:00",
        true,
    ),
    field("end_time", "End", "ISO 8601 date-time including the calendar date", false),
    field("attendees", "Attendees", "list of attendee email addresses", false),
];

const RESCHEDULE_FIELDS: [DraftField; 6] = [
    field("target", "Event", "title of the existing event to change", true),
    field(
        "target_start",
        "Currently at",
        "current start of that event as an ISO 8601 date-time, only if the user mentions it",
        false,
    ),
    field("title", "New title", "new title, only when renaming the event", false),
    field("start_time", "New start", "new ISO 8601 start date-time including the calendar date", false),
    field("end_time", "New end", "new ISO 8601 end date-time including the calendar date", false),
    field("attendees", "New attendees", "replacement list of attendee email addresses", false),
];

const CANCEL_FIELDS: [DraftField; 2] = [
    field("target", "Event", "title of the existing event to delete", true),
    field(
        "target_start",
        "At",
        "start of that event as an ISO 8601 date-time, only if the user mentions it",
        false,
    ),
];

/// Pseudo-slot reported missing while an edit names no new value.
pub const CHANGES_FIELD: &str = "changes";
const CHANGES_LABEL: &str = "What to change";

const EMAIL_FIELDS: [DraftField; 7] = [
    field("recipient", "To", "recipient email address", true),
    field("subject", "Subject", "subject line", true),
    field("body", "Body", "full message body", true),
    field("attachments", "Attachments", "list of attachment file names", false),
    field("folder", "Folder", "mailbox folder to file the message in", false),
    field("priority", "Priority", "one of low, normal, high", false),
    field("action", "Action", "`send` to send now or `draft` to save as a draft", false),
];

const REMIND_FIELDS: [DraftField; 3] = [
    field("title", "Reminder", "what to be reminded about", true),
    field(
        "due_at",
        "Due",
        "ISO 8601 date-time including the calendar date when the reminder fires",
        true,
    ),
    field("notes", "Notes", "extra detail to include with the reminder", false),
];

const TODO_FIELDS: [DraftField; 2] = [
    field("title", "Task", "short description of the task", true),
    field("due_date", "Due date", "calendar date in YYYY-MM-DD format", false),
];

const GOAL_FIELDS: [DraftField; 3] = [
    field("goal", "Goal", "the goal statement in the user's words", true),
    field("duration_weeks", "Duration (weeks)", "number of weeks to reach the goal", true),
    field(
        "build_around_calendar",
        "Build around calendar",
        "true if the plan should fit around existing calendar commitments",
        true,
    ),
];

/// Field schema for an intent. `General` has no slots.
pub fn field_schema(intent: IntentLabel) -> &'static [DraftField] {
    match intent {
        IntentLabel::Schedule => &SCHEDULE_FIELDS,
        IntentLabel::Email => &EMAIL_FIELDS,
        IntentLabel::Remind => &REMIND_FIELDS,
        IntentLabel::Todo => &TODO_FIELDS,
        IntentLabel::Goal => &GOAL_FIELDS,
        IntentLabel::General => &[],
    }
}

pub fn required_fields(intent: IntentLabel) -> Vec<&'static str> {
    field_schema(intent).iter().filter(|field| field.required).map(|field| field.name).collect()
}

/// What accepting a schedule draft does to the calendar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleOperation {
    #[default]
    Add,
    Edit,
    Delete,
}

impl ScheduleOperation {
    pub fn fields(self) -> &'static [DraftField] {
        match self {
            Self::Add => &SCHEDULE_FIELDS,
            Self::Edit => &RESCHEDULE_FIELDS,
            Self::Delete => &CANCEL_FIELDS,
        }
    }
}

/// Event details for `Add`. `Edit` and `Delete` name an existing event through
/// `target` (and optionally `target_start`); for `Edit` the remaining fields are
/// the new values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleDraft {
    pub operation: ScheduleOperation,
    pub target: Option<String>,
    pub target_start: Option<DateTime<FixedOffset>>,
    pub title: Option<String>,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub attendees: Vec<String>,
}

impl ScheduleDraft {
    pub fn for_operation(operation: ScheduleOperation) -> Self {
        Self { operation, ..Self::default() }
    }

    /// True when an edit carries at least one new value.
    pub fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || !self.attendees.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailAction {
    Send,
    Draft,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    Low,
    Normal,
    High,
}

impl EmailPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailDraft {
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub attachments: Vec<String>,
    pub folder: Option<String>,
    pub priority: Option<EmailPriority>,
    pub action: Option<EmailAction>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderDraft {
    pub title: Option<String>,
    pub due_at: Option<DateTime<FixedOffset>>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoDraft {
    pub title: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalDraft {
    pub goal: Option<String>,
    pub duration_weeks: Option<u32>,
    pub build_around_calendar: Option<bool>,
}

/// Partially or fully populated payload for one actionable intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Draft {
    Schedule(ScheduleDraft),
    Email(EmailDraft),
    Remind(ReminderDraft),
    Todo(TodoDraft),
    Goal(GoalDraft),
}

impl Draft {
    pub fn empty(intent: IntentLabel) -> Option<Self> {
        match intent {
            IntentLabel::Schedule => Some(Self::Schedule(ScheduleDraft::default())),
            IntentLabel::Email => Some(Self::Email(EmailDraft::default())),
            IntentLabel::Remind => Some(Self::Remind(ReminderDraft::default())),
            IntentLabel::Todo => Some(Self::Todo(TodoDraft::default())),
            IntentLabel::Goal => Some(Self::Goal(GoalDraft::default())),
            IntentLabel::General => None,
        }
    }

    pub fn intent(&self) -> IntentLabel {
        match self {
            Self::Schedule(_) => IntentLabel::Schedule,
            Self::Email(_) => IntentLabel::Email,
            Self::Remind(_) => IntentLabel::Remind,
            Self::Todo(_) => IntentLabel::Todo,
            Self::Goal(_) => IntentLabel::Goal,
        }
    }

    /// Slots of this draft. Schedule drafts vary with their operation.
    pub fn schema(&self) -> &'static [DraftField] {
        match self {
            Self::Schedule(draft) => draft.operation.fields(),
            other => field_schema(other.intent()),
        }
    }

    /// Display value of a slot, `None` while the slot is absent.
    pub fn field_value(&self, name: &str) -> Option<String> {
        match self {
            Self::Schedule(draft) => match name {
                "target" => draft.target.clone(),
                "target_start" => draft.target_start.as_ref().map(render_instant),
                "title" => draft.title.clone(),
                "start_time" => draft.start_time.as_ref().map(render_instant),
                "end_time" => draft.end_time.as_ref().map(render_instant),
                "attendees" => render_list(&draft.attendees),
                _ => None,
            },
            Self::Email(draft) => match name {
                "recipient" => draft.recipient.clone(),
                "subject" => draft.subject.clone(),
                "body" => draft.body.clone(),
                "attachments" => render_list(&draft.attachments),
                "folder" => draft.folder.clone(),
                "priority" => draft.priority.map(|priority| priority.as_str().to_owned()),
                "action" => draft.action.map(|action| match action {
                    EmailAction::Send => "send".to_owned(),
                    EmailAction::Draft => "save as draft".to_owned(),
                }),
                _ => None,
            },
            Self::Remind(draft) => match name {
                "title" => draft.title.clone(),
                "due_at" => draft.due_at.as_ref().map(render_instant),
                "notes" => draft.notes.clone(),
                _ => None,
            },
            Self::Todo(draft) => match name {
                "title" => draft.title.clone(),
                "due_date" => draft.due_date.map(|date| date.format("%Y-%m-%d").to_string()),
                _ => None,
            },
            Self::Goal(draft) => match name {
                "goal" => draft.goal.clone(),
                "duration_weeks" => draft.duration_weeks.map(|weeks| weeks.to_string()),
                "build_around_calendar" => {
                    draft.build_around_calendar.map(|flag| (if flag { "yes" } else { "no" }).to_owned())
                }
                _ => None,
            },
        }
    }

    /// Required slots that are still absent, in schema order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing: Vec<&'static str> = self
            .schema()
            .iter()
            .filter(|field| field.required && self.field_value(field.name).is_none())
            .map(|field| field.name)
            .collect();
        if let Self::Schedule(draft) = self {
            if draft.operation == ScheduleOperation::Edit && !draft.has_changes() {
                missing.push(CHANGES_FIELD);
            }
        }
        missing
    }

    pub fn ready_for_confirm(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Overlays `patch` onto `self`. Present values in the patch win; absent ones never erase.
    pub fn merge(&mut self, patch: Draft) -> Result<(), DomainError> {
        match (self, patch) {
            (Self::Schedule(current), Self::Schedule(patch)) => {
                overlay(&mut current.target, patch.target);
                overlay(&mut current.target_start, patch.target_start);
                overlay(&mut current.title, patch.title);
                overlay(&mut current.start_time, patch.start_time);
                overlay(&mut current.end_time, patch.end_time);
                overlay_list(&mut current.attendees, patch.attendees);
                // A deletion only names an event; a bare title is taken as that name.
                if current.operation == ScheduleOperation::Delete && current.target.is_none() {
                    current.target = current.title.take();
                }
            }
            (Self::Email(current), Self::Email(patch)) => {
                overlay(&mut current.recipient, patch.recipient);
                overlay(&mut current.subject, patch.subject);
                overlay(&mut current.body, patch.body);
                overlay_list(&mut current.attachments, patch.attachments);
                overlay(&mut current.folder, patch.folder);
                overlay(&mut current.priority, patch.priority);
                overlay(&mut current.action, patch.action);
            }
            (Self::Remind(current), Self::Remind(patch)) => {
                overlay(&mut current.title, patch.title);
                overlay(&mut current.due_at, patch.due_at);
                overlay(&mut current.notes, patch.notes);
            }
            (Self::Todo(current), Self::Todo(patch)) => {
                overlay(&mut current.title, patch.title);
                overlay(&mut current.due_date, patch.due_date);
            }
            (Self::Goal(current), Self::Goal(patch)) => {
                overlay(&mut current.goal, patch.goal);
                overlay(&mut current.duration_weeks, patch.duration_weeks);
                overlay(&mut current.build_around_calendar, patch.build_around_calendar);
            }
            (current, patch) => {
                return Err(DomainError::DraftIntentMismatch {
                    expected: current.intent(),
                    found: patch.intent(),
                });
            }
        }
        Ok(())
    }

    /// Builds a draft from an extracted JSON object, dropping values that do not normalise.
    pub fn from_extraction(
        intent: IntentLabel,
        fields: &Map<String, Value>,
        local: FixedOffset,
    ) -> Option<Self> {
        let draft = match intent {
            IntentLabel::Schedule => Self::Schedule(ScheduleDraft {
                operation: ScheduleOperation::Add,
                target: text(fields, &["target", "event"]),
                target_start: datetime(fields, &["target_start", "current_start"], local),
                title: text(fields, &["title"]),
                start_time: datetime(fields, &["start_time", "start"], local),
                end_time: datetime(fields, &["end_time", "end"], local),
                attendees: list(fields, &["attendees"]),
            }),
            IntentLabel::Email => Self::Email(EmailDraft {
                recipient: text(fields, &["recipient", "to"]),
                subject: text(fields, &["subject"]),
                body: text(fields, &["body"]),
                attachments: list(fields, &["attachments"]),
                folder: text(fields, &["folder"]),
                priority: text(fields, &["priority"]).and_then(|value| {
                    match value.to_ascii_lowercase().as_str() {
                        "low" => Some(EmailPriority::Low),
                        "normal" | "medium" => Some(EmailPriority::Normal),
                        "high" | "urgent" => Some(EmailPriority::High),
                        _ => None,
                    }
                }),
                action: text(fields, &["action"]).and_then(|value| {
                    match value.to_ascii_lowercase().as_str() {
                        "send" => Some(EmailAction::Send),
                        "draft" => Some(EmailAction::Draft),
                        _ => None,
                    }
                }),
            }),
            IntentLabel::Remind => Self::Remind(ReminderDraft {
                title: text(fields, &["title"]),
                due_at: datetime(fields, &["due_at", "due", "remind_at"], local),
                notes: text(fields, &["notes"]),
            }),
            IntentLabel::Todo => Self::Todo(TodoDraft {
                title: text(fields, &["title"]),
                due_date: text(fields, &["due_date", "due"])
                    .and_then(|value| normalize_date(&value, local)),
            }),
            IntentLabel::Goal => Self::Goal(GoalDraft {
                goal: text(fields, &["goal"]),
                duration_weeks: weeks(fields, &["duration_weeks", "duration"]),
                build_around_calendar: boolean(fields, &["build_around_calendar", "calendar"]),
            }),
            IntentLabel::General => return None,
        };
        Some(draft)
    }

    /// Deterministic field-by-field rendering of known values and still-missing slots.
    pub fn render_details(&self) -> String {
        let mut lines = Vec::new();
        if let Self::Schedule(draft) = self {
            match draft.operation {
                ScheduleOperation::Add => {}
                ScheduleOperation::Edit => lines.push("- Action: update an existing event".to_owned()),
                ScheduleOperation::Delete => lines.push("- Action: delete an existing event".to_owned()),
            }
        }
        for field in self.schema() {
            if let Some(value) = self.field_value(field.name) {
                lines.push(format!("- {}: {}", field.label, value));
            }
        }

        let missing = self.missing_fields();
        if !missing.is_empty() {
            let labels: Vec<&str> = missing
                .iter()
                .map(|name| {
                    self.schema()
                        .iter()
                        .find(|field| field.name == *name)
                        .map_or(CHANGES_LABEL, |field| field.label)
                })
                .collect();
            lines.push(format!("- Still needed: {}", labels.join(", ")));
        }

        if lines.is_empty() {
            "- (no details yet)".to_owned()
        } else {
            lines.join("\n")
        }
    }
}

fn overlay<T>(current: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *current = incoming;
    }
}

fn overlay_list(current: &mut Vec<String>, incoming: Vec<String>) {
    if !incoming.is_empty() {
        *current = incoming;
    }
}

fn render_instant(instant: &DateTime<FixedOffset>) -> String {
    instant.format("%Y-%m-%d %H:%M %:z").to_string()
}

fn render_list(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(", "))
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key)).filter(|value| !value.is_null())
}

fn clean_text(raw: &str) -> Option<String> {
    let value = raw.trim();
    let placeholder = matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "null" | "none" | "n/a" | "unknown" | "tbd"
    );
    (!placeholder).then(|| value.to_owned())
}

fn text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match lookup(fields, keys)? {
        Value::String(value) => clean_text(value),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn datetime(
    fields: &Map<String, Value>,
    keys: &[&str],
    local: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    text(fields, keys).and_then(|value| normalize_datetime(&value, local))
}

fn list(fields: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match lookup(fields, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter_map(clean_text)
            .collect(),
        Some(Value::String(joined)) => joined.split(',').filter_map(clean_text).collect(),
        _ => Vec::new(),
    }
}

fn boolean(fields: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    match lookup(fields, keys)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Some(true),
            "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn weeks(fields: &Map<String, Value>, keys: &[&str]) -> Option<u32> {
    let parsed = match lookup(fields, keys)? {
        Value::Number(number) => number.as_u64().and_then(|value| u32::try_from(value).ok()),
        Value::String(value) => {
            let digits: String =
                value.trim().chars().take_while(|ch| ch.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        }
        _ => None,
    }?;
    (1..=52).contains(&parsed).then_some(parsed)
}
