//! Slot filling: one extraction call per turn, merged onto the pending draft.

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use serde_json::Value;
use tempra_core::domain::draft::ScheduleOperation;
use tempra_core::{ChatMessage, Draft, GatewayError, IntentLabel};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_object;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("intent `{0}` does not collect a draft")]
    NotActionable(IntentLabel),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub confirmation_message: String,
    /// `None` after an unparseable extraction; slot filling restarts next turn.
    pub draft: Option<Draft>,
    pub ready_for_confirm: bool,
    pub missing_fields: Vec<&'static str>,
}

pub fn parse_failure_message(intent: IntentLabel) -> String {
    let noun = match intent {
        IntentLabel::Schedule => "event",
        IntentLabel::Email => "email",
        IntentLabel::Remind => "reminder",
        IntentLabel::Todo => "task",
        IntentLabel::Goal => "goal",
        IntentLabel::General => "request",
    };
    format!(
        "Sorry, I couldn't parse the {noun} details. Could you please provide the {noun} information again?"
    )
}

pub struct DraftMerger {
    gateway: Arc<dyn CompletionGateway>,
    timeout: Duration,
    local_offset: FixedOffset,
}

impl DraftMerger {
    pub fn new(gateway: Arc<dyn CompletionGateway>, timeout: Duration, local_offset: FixedOffset) -> Self {
        Self { gateway, timeout, local_offset }
    }

    /// Extracts fields from `message` and overlays them onto `prior`.
    ///
    /// A prior draft for a different intent is ignored. Gateway failures are
    /// returned so the caller can leave the session untouched.
    pub async fn merge(
        &self,
        intent: IntentLabel,
        message: &str,
        prior: Option<&Draft>,
    ) -> Result<MergeOutcome, MergeError> {
        let Some(empty) = Draft::empty(intent) else {
            return Err(MergeError::NotActionable(intent));
        };
        match prior.filter(|draft| draft.intent() == intent) {
            Some(prior) => self.extract_onto(prior.clone(), message, true).await,
            None => self.extract_onto(empty, message, false).await,
        }
    }

    /// Starts slot filling from `seed`, which fixes the sub-action (for example
    /// deleting rather than adding an event).
    pub async fn start(&self, seed: Draft, message: &str) -> Result<MergeOutcome, MergeError> {
        self.extract_onto(seed, message, false).await
    }

    async fn extract_onto(
        &self,
        base: Draft,
        message: &str,
        send_known: bool,
    ) -> Result<MergeOutcome, MergeError> {
        let intent = base.intent();
        let known = send_known.then_some(&base);
        let request = CompletionRequest::new(self.prompt(&base, message, known)).with_max_tokens(600);
        let reply = complete_within(self.gateway.as_ref(), request, self.timeout).await?;

        let Some(fields) = parse_object(&reply) else {
            warn!(event_name = "draft.extraction.unparseable", intent = %intent, "extraction reply was not JSON");
            return Ok(self.restart(intent));
        };
        let confirmation = match fields.get("confirmation_message") {
            Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_owned(),
            _ => {
                warn!(
                    event_name = "draft.extraction.unparseable",
                    intent = %intent,
                    "extraction reply had no confirmation_message"
                );
                return Ok(self.restart(intent));
            }
        };

        let mut draft = base;
        let Some(patch) = Draft::from_extraction(intent, &fields, self.local_offset) else {
            return Ok(self.restart(intent));
        };
        if draft.merge(patch).is_err() {
            return Ok(self.restart(intent));
        }

        let missing_fields = draft.missing_fields();
        let ready_for_confirm = missing_fields.is_empty();
        info!(
            event_name = "draft.merged",
            intent = %intent,
            missing = ?missing_fields,
            ready_for_confirm,
            "merged extraction into draft"
        );

        Ok(MergeOutcome {
            confirmation_message: format!(
                "{confirmation}\n\n---\nCurrent details:\n{}\n---",
                draft.render_details()
            ),
            draft: Some(draft),
            ready_for_confirm,
            missing_fields,
        })
    }

    fn restart(&self, intent: IntentLabel) -> MergeOutcome {
        MergeOutcome {
            confirmation_message: parse_failure_message(intent),
            draft: None,
            ready_for_confirm: false,
            missing_fields: Vec::new(),
        }
    }

    fn prompt(&self, base: &Draft, message: &str, prior: Option<&Draft>) -> Vec<ChatMessage> {
        let schema: Vec<String> = base
            .schema()
            .iter()
            .map(|field| {
                let presence = if field.required { "required" } else { "optional" };
                format!("  \"{}\": {} ({presence})", field.name, field.description)
            })
            .collect();
        let now = Utc::now().with_timezone(&self.local_offset);

        let system = format!(
            "You extract {label} details from the user's message.\n\
             The current date-time is {now} ({weekday}). Resolve relative dates such as \
             \"tomorrow\" against it and write every date-time as ISO 8601 with the calendar date. \
             If the user gives a time without a day, leave that field null.\n\
             Fields:\n{schema}\n\n\
             Reply only with one JSON object containing those fields (null when unknown), \
             a \"missing_fields\" array naming the required fields that are still unknown, and a \
             \"confirmation_message\" that politely summarises the request and asks for anything missing \
             or for confirmation. If current known details are given, merge them into your reply.",
            label = subject(base),
            now = now.format("%Y-%m-%dT%H:%M:%S%:z"),
            weekday = now.format("%A"),
            schema = schema.join("\n"),
        );

        let mut messages = vec![ChatMessage::system(system)];
        if let Some(draft) = prior {
            if let Ok(json) = serde_json::to_string(draft) {
                messages.push(ChatMessage::assistant(format!("Current known details (JSON): {json}")));
            }
        }
        messages.push(ChatMessage::user(format!("User message: {message}")));
        messages
    }
}

fn subject(draft: &Draft) -> String {
    match draft {
        Draft::Schedule(schedule) => match schedule.operation {
            ScheduleOperation::Add => "event".to_owned(),
            ScheduleOperation::Edit => "event change".to_owned(),
            ScheduleOperation::Delete => "event deletion".to_owned(),
        },
        other => other.intent().as_str().to_lowercase(),
    }
}
