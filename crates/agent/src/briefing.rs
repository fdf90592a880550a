//! Read-only answers about the calendar and the inbox.
//!
//! These run inside the turn that asked for them and never produce a draft.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempra_core::domain::timestamp::{normalize_date, utc_offset, CalendarPeriod};
use tempra_core::providers::{CalendarProvider, CredentialProvider, EmailProvider, EmailSummary};
use tempra_core::{ApplicationError, ChatMessage, DomainError, ProviderError, UserIdentity};
use tracing::{debug, info};

use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_object;
use crate::router::Lookup;

const RECENT_LIMIT: usize = 10;
const PRIORITY_LIMIT: usize = 15;
const SEARCH_LIMIT_MAX: usize = 25;
const SNIPPET_CHARS: usize = 100;

#[derive(Clone)]
pub struct BriefingDeps {
    pub calendar: Arc<dyn CalendarProvider>,
    pub email: Arc<dyn EmailProvider>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub gateway: Arc<dyn CompletionGateway>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BriefingSettings {
    pub provider_timeout: Duration,
    pub gateway_timeout: Duration,
    pub local_offset: FixedOffset,
}

impl Default for BriefingSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(20),
            gateway_timeout: Duration::from_secs(30),
            local_offset: utc_offset(0),
        }
    }
}

pub struct Briefer {
    deps: BriefingDeps,
    settings: BriefingSettings,
}

impl Briefer {
    pub fn new(deps: BriefingDeps, settings: BriefingSettings) -> Self {
        Self { deps, settings }
    }

    /// Answers `lookup` for `user`. Credential and gateway failures are returned
    /// untouched so the caller can pick the reply.
    pub async fn answer(
        &self,
        lookup: Lookup,
        message: &str,
        user: &UserIdentity,
    ) -> Result<String, ApplicationError> {
        let token = self.deps.credentials.get_credentials(&user.user_id).await?.access_token;
        let reply = match lookup {
            Lookup::CalendarSummary => self.calendar_summary(message, &token).await?,
            Lookup::InboxSummary { priority_only } => self.inbox_summary(&token, priority_only).await?,
            Lookup::InboxSearch => self.inbox_search(message, &token).await?,
        };
        info!(event_name = "lookup.answered", lookup = ?lookup, user_id = %user.user_id, "answered read-only request");
        Ok(reply)
    }

    async fn calendar_summary(
        &self,
        message: &str,
        token: &SecretString,
    ) -> Result<String, ApplicationError> {
        let today = Utc::now().with_timezone(&self.settings.local_offset).date_naive();
        let prompt = vec![
            ChatMessage::system(format!(
                "Extract the period (day, week or month) and the reference date from the user's message. \
                 Today is {today} ({weekday}). If no date is given, use today.\n\
                 Reply only with JSON like {{\"period\": \"day\", \"date\": \"2026-07-16\"}}",
                today = today.format("%Y-%m-%d"),
                weekday = today.format("%A"),
            )),
            ChatMessage::user(format!("User message: {message}")),
        ];
        let reply = self.complete(CompletionRequest::new(prompt).with_max_tokens(60)).await?;

        let fields = parse_object(&reply).unwrap_or_default();
        let period = fields
            .get("period")
            .and_then(Value::as_str)
            .and_then(CalendarPeriod::parse)
            .unwrap_or(CalendarPeriod::Day);
        let date = fields
            .get("date")
            .and_then(Value::as_str)
            .and_then(|raw| normalize_date(raw, self.settings.local_offset))
            .unwrap_or(today);
        let (from, to) = period.window(date, self.settings.local_offset).ok_or_else(|| {
            DomainError::InvariantViolation(format!("no {} window around {date}", period.as_str()))
        })?;
        debug!(event_name = "lookup.calendar.window", period = period.as_str(), %from, %to, "summarizing calendar window");

        let events = self.call(self.deps.calendar.list_events(token, from, to)).await?;
        if events.is_empty() {
            return Ok(format!("No events found for the selected {}.", period.as_str()));
        }

        let listed: Vec<Value> = events
            .iter()
            .map(|event| {
                json!({
                    "title": event.title,
                    "start_time": event.start.to_rfc3339(),
                    "end_time": event.end.to_rfc3339(),
                    "attendees": event.attendees,
                })
            })
            .collect();
        let events_json =
            serde_json::to_string_pretty(&listed).unwrap_or_else(|_| Value::Array(listed).to_string());
        let prompt = vec![
            ChatMessage::system("You are an assistant that summarizes calendar events for users."),
            ChatMessage::user(format!(
                "Summarize the following calendar events in a concise, natural language paragraph. \
                 Focus on the main themes, busy and quiet periods, and notable meetings. \
                 The user's request was: '{message}'.\nEvents:\n{events_json}"
            )),
        ];
        let summary = self
            .complete(CompletionRequest::new(prompt).with_max_tokens(200).with_temperature(0.5))
            .await?;
        Ok(summary.trim().to_owned())
    }

    async fn inbox_summary(
        &self,
        token: &SecretString,
        priority_only: bool,
    ) -> Result<String, ApplicationError> {
        let limit = if priority_only { PRIORITY_LIMIT } else { RECENT_LIMIT };
        let emails = self.call(self.deps.email.search_emails(token, "", limit)).await?;
        if emails.is_empty() {
            return Ok("No recent emails found to summarize.".to_owned());
        }

        let listing: Vec<String> = emails
            .iter()
            .map(|email| format!("From: {}\nSubject: {}\nSnippet: {}\n---", email.from, email.subject, email.snippet))
            .collect();
        let instructions = if priority_only {
            "List only the emails that look important or urgent and say briefly why each needs attention. \
             If none do, say so."
        } else {
            "Summarize them covering key themes, emails that need attention, anything urgent, \
             and the overall volume."
        };
        let prompt = vec![ChatMessage::user(format!(
            "Here are the user's recent emails:\n\n{}\n\n{instructions}",
            listing.join("\n")
        ))];
        let summary = self
            .complete(CompletionRequest::new(prompt).with_max_tokens(500).with_temperature(0.7))
            .await?;

        let heading = if priority_only { "Emails needing attention" } else { "Email summary" };
        Ok(format!("{heading} ({} checked):\n\n{}", emails.len(), summary.trim()))
    }

    async fn inbox_search(
        &self,
        message: &str,
        token: &SecretString,
    ) -> Result<String, ApplicationError> {
        let prompt = vec![ChatMessage::user(format!(
            "Extract the search query from this message: \"{message}\"\n\
             Reply only with JSON like {{\"query\": \"meeting tomorrow\", \"limit\": 5}}"
        ))];
        let reply = self.complete(CompletionRequest::new(prompt).with_max_tokens(100)).await?;

        let fields = parse_object(&reply).unwrap_or_default();
        let query = fields
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .unwrap_or(message)
            .to_owned();
        let limit = fields
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(RECENT_LIMIT, |limit| (limit as usize).clamp(1, SEARCH_LIMIT_MAX));

        let results = self.call(self.deps.email.search_emails(token, &query, limit)).await?;
        if results.is_empty() {
            return Ok(format!("No emails found for: {query}"));
        }
        Ok(render_results(&query, &results))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ApplicationError> {
        Ok(complete_within(self.deps.gateway.as_ref(), request, self.settings.gateway_timeout).await?)
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
}

fn render_results(query: &str, results: &[EmailSummary]) -> String {
    let mut lines = vec![format!("Search results for '{query}' ({} found):", results.len())];
    for (index, email) in results.iter().enumerate() {
        lines.push(format!("{}. {}", index + 1, email.subject));
        lines.push(format!("   From: {}", email.from));
        let snippet: String = email.snippet.chars().take(SNIPPET_CHARS).collect();
        if !snippet.is_empty() {
            lines.push(format!("   {snippet}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use tempra_core::domain::timestamp::utc_offset;
    use tempra_core::providers::{
        CalendarProvider, EmailSummary, InMemoryCalendar, InMemoryMailbox, NewEvent,
        StaticCredentialProvider,
    };
    use tempra_core::{ApplicationError, GatewayError, UserIdentity};

    use super::{Briefer, BriefingDeps, BriefingSettings};
    use crate::llm::ScriptedGateway;
    use crate::router::Lookup;

    struct Harness {
        briefer: Briefer,
        gateway: ScriptedGateway,
        calendar: InMemoryCalendar,
        mailbox: InMemoryMailbox,
    }

    fn harness(credentials: StaticCredentialProvider) -> Harness {
        let gateway = ScriptedGateway::default();
        let calendar = InMemoryCalendar::default();
        let mailbox = InMemoryMailbox::default();
        let briefer = Briefer::new(
            BriefingDeps {
                calendar: Arc::new(calendar.clone()),
                email: Arc::new(mailbox.clone()),
                credentials: Arc::new(credentials),
                gateway: Arc::new(gateway.clone()),
            },
            BriefingSettings { local_offset: utc_offset(0), ..BriefingSettings::default() },
        );
        Harness { briefer, gateway, calendar, mailbox }
    }

    fn user() -> UserIdentity {
        UserIdentity::new("u-1")
    }

    fn inbox() -> Vec<EmailSummary> {
        [("m-1", "Q3 budget review"), ("m-2", "Lunch?"), ("m-3", "Budget sign-off needed")]
            .into_iter()
            .map(|(id, subject)| EmailSummary {
                id: id.to_owned(),
                from: "finance@example.com".to_owned(),
                subject: subject.to_owned(),
                snippet: format!("About: {subject}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn calendar_summary_reads_the_requested_day() {
        let h = harness(StaticCredentialProvider::default().with_user("u-1", "token"));
        let today = Utc::now().date_naive();
        let start = today
            .and_hms_opt(12, 0, 0)
            .expect("noon")
            .and_local_timezone(utc_offset(0))
            .single()
            .expect("fixed offset");
        for (title, offset_days) in [("Lunch with Sam", 0), ("Offsite", 3)] {
            h.calendar
                .insert_event(
                    &SecretString::from("token".to_owned()),
                    NewEvent {
                        title: title.to_owned(),
                        start: start + Duration::days(offset_days),
                        end: start + Duration::days(offset_days) + Duration::hours(1),
                        attendees: vec![],
                    },
                )
                .await
                .expect("seeded");
        }
        h.gateway.push_reply(format!(r#"{{"period": "day", "date": "{}"}}"#, today.format("%Y-%m-%d")));
        h.gateway.push_reply("A quiet day with lunch with Sam at noon.");

        let reply = h.briefer.answer(Lookup::CalendarSummary, "what's on today?", &user()).await;

        assert_eq!(reply, Ok("A quiet day with lunch with Sam at noon.".to_owned()));
        let summary_prompt = &h.gateway.requests()[1].messages[1].content;
        assert!(summary_prompt.contains("Lunch with Sam"));
        assert!(!summary_prompt.contains("Offsite"));
    }

    #[tokio::test]
    async fn empty_period_skips_the_summary_call() {
        let h = harness(StaticCredentialProvider::default().with_user("u-1", "token"));
        h.gateway.push_reply(r#"{"period": "week"}"#);

        let reply = h.briefer.answer(Lookup::CalendarSummary, "my week", &user()).await;

        assert_eq!(reply, Ok("No events found for the selected week.".to_owned()));
        assert_eq!(h.gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn inbox_search_uses_the_extracted_query() {
        let h = harness(StaticCredentialProvider::default().with_user("u-1", "token"));
        h.mailbox.seed_inbox(inbox()).await;
        h.gateway.push_reply(r#"{"query": "budget", "limit": 5}"#);

        let reply = h
            .briefer
            .answer(Lookup::InboxSearch, "find the budget emails", &user())
            .await
            .expect("search");

        assert_eq!(h.mailbox.searches().await, vec!["budget".to_owned()]);
        assert!(reply.starts_with("Search results for 'budget' (2 found):"));
        assert!(reply.contains("1. Q3 budget review\n   From: finance@example.com"));
        assert!(!reply.contains("Lunch?"));
    }

    #[tokio::test]
    async fn inbox_summary_lists_every_recent_email_for_the_model() {
        let h = harness(StaticCredentialProvider::default().with_user("u-1", "token"));
        h.mailbox.seed_inbox(inbox()).await;
        h.gateway.push_reply("Two budget threads need a reply.");

        let reply = h
            .briefer
            .answer(Lookup::InboxSummary { priority_only: true }, "anything urgent?", &user())
            .await
            .expect("summary");

        assert_eq!(reply, "Emails needing attention (3 checked):\n\nTwo budget threads need a reply.");
        let prompt = &h.gateway.requests()[0].messages[0].content;
        assert!(prompt.contains("Subject: Lunch?"));
        assert!(prompt.contains("important or urgent"));
    }

    #[tokio::test]
    async fn credential_and_gateway_failures_are_returned() {
        let h = harness(StaticCredentialProvider::default());
        let error = h
            .briefer
            .answer(Lookup::InboxSummary { priority_only: false }, "summarize", &user())
            .await
            .expect_err("no credentials");
        assert!(error.requires_reauthentication());
        assert_eq!(h.gateway.call_count(), 0);

        let h = harness(StaticCredentialProvider::default().with_user("u-1", "token"));
        h.gateway.push_error(GatewayError::Timeout { after_secs: 30 });
        let error = h
            .briefer
            .answer(Lookup::InboxSearch, "find budget", &user())
            .await
            .expect_err("gateway down");
        assert!(matches!(error, ApplicationError::Gateway(GatewayError::Timeout { .. })));
    }
}
