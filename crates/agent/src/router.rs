use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tempra_core::config::DialogueConfig;
use tempra_core::domain::draft::{EmailAction, EmailDraft, ScheduleDraft, ScheduleOperation};
use tempra_core::{ChatMessage, Draft, IntentLabel};
use tracing::{debug, warn};

use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_keyword;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Exit,
}

/// Read-only requests answered in the same turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    CalendarSummary,
    InboxSummary { priority_only: bool },
    InboxSearch,
}

/// What a fresh `Schedule` or `Email` turn asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum SubAction {
    /// Start slot filling from this seed draft.
    Collect(Draft),
    Answer(Lookup),
}

impl SubAction {
    /// Maps a one-word label onto a sub-action. Unknown words start the intent's default draft.
    pub fn from_label(intent: IntentLabel, raw: &str) -> Option<Self> {
        let word = parse_keyword(raw).unwrap_or_default();
        let schedule = |operation| Self::Collect(Draft::Schedule(ScheduleDraft::for_operation(operation)));
        let email = |action| Self::Collect(Draft::Email(EmailDraft { action, ..EmailDraft::default() }));

        match intent {
            IntentLabel::Schedule => Some(match word.as_str() {
                "EDIT" | "UPDATE" | "RESCHEDULE" | "MOVE" => schedule(ScheduleOperation::Edit),
                "DELETE" | "CANCEL" | "REMOVE" => schedule(ScheduleOperation::Delete),
                "SUMMARIZE" | "SUMMARY" | "LIST" => Self::Answer(Lookup::CalendarSummary),
                _ => schedule(ScheduleOperation::Add),
            }),
            IntentLabel::Email => Some(match word.as_str() {
                "DRAFT" => email(Some(EmailAction::Draft)),
                "SUMMARIZE" | "SUMMARY" => Self::Answer(Lookup::InboxSummary { priority_only: false }),
                "PRIORITY" | "IMPORTANT" => Self::Answer(Lookup::InboxSummary { priority_only: true }),
                "SEARCH" | "FIND" => Self::Answer(Lookup::InboxSearch),
                _ => email(None),
            }),
            _ => None,
        }
    }
}

/// Words that pull a conversation out of `General` without asking the model.
const ACTION_TOPICS: &[&str] = &[
    "schedule", "meeting", "meet", "calendar", "event", "appointment", "book", "email", "emails",
    "mail", "inbox", "send", "draft", "remind", "reminder", "reminders", "todo", "todos", "task",
    "tasks", "goal", "goals", "plan",
];

pub fn mentions_action_topic(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("to-do")
        || lower
            .split(|ch: char| !ch.is_alphanumeric())
            .any(|word| ACTION_TOPICS.contains(&word))
}

pub struct IntentRouter {
    gateway: Arc<dyn CompletionGateway>,
    timeout: Duration,
    enabled: BTreeSet<IntentLabel>,
    continuation_window: usize,
}

impl IntentRouter {
    pub fn new(gateway: Arc<dyn CompletionGateway>, timeout: Duration, dialogue: &DialogueConfig) -> Self {
        let mut enabled = dialogue.enabled_intents.clone();
        enabled.insert(IntentLabel::General);
        Self { gateway, timeout, enabled, continuation_window: dialogue.continuation_window }
    }

    pub fn is_enabled(&self, intent: IntentLabel) -> bool {
        self.enabled.contains(&intent)
    }

    /// Decides whether `message` stays inside `active`. Anything unclear is an exit.
    pub async fn check_continuation(
        &self,
        active: IntentLabel,
        history: &[ChatMessage],
        message: &str,
    ) -> Continuation {
        if active == IntentLabel::General && mentions_action_topic(message) {
            debug!(event_name = "router.continuation.forced_exit", "action topic mentioned while in General");
            return Continuation::Exit;
        }

        let start = history.len().saturating_sub(self.continuation_window);
        let mut messages =
            vec![ChatMessage::system("Decide if a user is continuing their current task or not.")];
        messages.extend(history[start..].iter().filter(|entry| !entry.is_blank()).cloned());
        messages.push(ChatMessage::user(format!(
            "The current task is: {active}.\n\
             Determine whether the user's message continues this task or changes topics.\n\n\
             User message: \"{message}\"\n\n\
             Reply only with \"CONTINUE\" or \"EXIT\"."
        )));

        let request = CompletionRequest::classification(messages).with_max_tokens(3);
        match complete_within(self.gateway.as_ref(), request, self.timeout).await {
            Ok(reply) if parse_keyword(&reply).as_deref() == Some("CONTINUE") => Continuation::Continue,
            Ok(reply) => {
                debug!(event_name = "router.continuation.exit", reply = %reply.trim(), "continuation check said exit");
                Continuation::Exit
            }
            Err(error) => {
                warn!(event_name = "router.continuation.failed", error = %error, "continuation check failed");
                Continuation::Exit
            }
        }
    }

    /// Single-label classification over the enabled intents. Falls back to `General`.
    pub async fn classify(&self, history: &[ChatMessage], message: &str) -> IntentLabel {
        let labels: Vec<String> = self.enabled.iter().map(|label| format!("\"{label}\"")).collect();
        let mut messages = vec![ChatMessage::system(format!(
            "Based on the intent of the message return one of these: {}.\n\
             Reply with ONLY ONE WORD from these choices. Use \"Todo\" for adding items to a task list, \
             \"Remind\" for a reminder at a specific time, \"Goal\" for a longer-term goal that needs a \
             multi-week plan, and \"General\" for anything else.",
            labels.join(", ")
        ))];
        messages.extend(history.iter().filter(|entry| !entry.is_blank()).cloned());
        messages.push(ChatMessage::user(message));

        let reply = match complete_within(
            self.gateway.as_ref(),
            CompletionRequest::classification(messages),
            self.timeout,
        )
        .await
        {
            Ok(reply) => reply,
            Err(error) => {
                warn!(event_name = "router.classification.failed", error = %error, "classification failed");
                return IntentLabel::General;
            }
        };

        let label = IntentLabel::from_classifier_output(&reply);
        if self.is_enabled(label) {
            label
        } else {
            debug!(event_name = "router.classification.disabled", intent = %label, "intent not enabled");
            IntentLabel::General
        }
    }

    /// Splits a fresh `Schedule` or `Email` request into its sub-action.
    ///
    /// Other intents have none and skip the gateway. A failed call falls back to
    /// adding an event or composing an email.
    pub async fn classify_sub_action(&self, intent: IntentLabel, message: &str) -> Option<SubAction> {
        let choices = match intent {
            IntentLabel::Schedule => {
                "- \"add\": add a new event\n\
                 - \"edit\": change an existing event\n\
                 - \"delete\": delete an existing event\n\
                 - \"summarize\": summarize events for a day, week or month"
            }
            IntentLabel::Email => {
                "- \"compose\": write and send a new email\n\
                 - \"draft\": write an email and save it as a draft\n\
                 - \"summarize\": summarize recent emails\n\
                 - \"priority\": show the important emails that need attention\n\
                 - \"search\": find specific emails"
            }
            _ => return None,
        };
        let messages = vec![
            ChatMessage::system(format!(
                "Classify the user's {} request into one of these categories:\n{choices}\n\
                 Reply with ONLY ONE WORD from the choices above.",
                intent.as_str().to_lowercase()
            )),
            ChatMessage::user(message),
        ];

        let reply = match complete_within(
            self.gateway.as_ref(),
            CompletionRequest::classification(messages),
            self.timeout,
        )
        .await
        {
            Ok(reply) => reply,
            Err(error) => {
                warn!(event_name = "router.sub_action.failed", intent = %intent, error = %error, "sub-action classification failed");
                String::new()
            }
        };
        let action = SubAction::from_label(intent, &reply);
        debug!(event_name = "router.sub_action", intent = %intent, action = ?action, "sub-action classified");
        action
    }

    /// True only for an explicit `MULTI` answer.
    pub async fn detect_compound(&self, history: &[ChatMessage], message: &str) -> bool {
        let start = history.len().saturating_sub(self.continuation_window);
        let mut messages = vec![ChatMessage::system(
            "Decide whether the user's request is a single action (for example one meeting, one email or \
             one reminder) or a compound request that needs several steps or tools, such as searching \
             and then acting on each result.\nReply only with \"SINGLE\" or \"MULTI\".",
        )];
        messages.extend(history[start..].iter().filter(|entry| !entry.is_blank()).cloned());
        messages.push(ChatMessage::user(message));

        match complete_within(
            self.gateway.as_ref(),
            CompletionRequest::classification(messages).with_max_tokens(3),
            self.timeout,
        )
        .await
        {
            Ok(reply) => parse_keyword(&reply).as_deref() == Some("MULTI"),
            Err(error) => {
                warn!(event_name = "router.compound.failed", error = %error, "compound detection failed");
                false
            }
        }
    }
}
