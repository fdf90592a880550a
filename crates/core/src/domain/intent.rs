use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of things a user can ask for in a single turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntentLabel {
    Schedule,
    Email,
    Remind,
    Todo,
    Goal,
    General,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 6] =
        [Self::Schedule, Self::Email, Self::Remind, Self::Todo, Self::Goal, Self::General];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "Schedule",
            Self::Email => "Email",
            Self::Remind => "Remind",
            Self::Todo => "Todo",
            Self::Goal => "Goal",
            Self::General => "General",
        }
    }

    /// Actionable intents carry a draft and end in a commit.
    pub fn is_actionable(self) -> bool {
        !matches!(self, Self::General)
    }

    /// Maps raw classifier output onto a label. Anything unrecognised is `General`.
    pub fn from_classifier_output(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::General)
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown intent label `{0}`")]
pub struct UnknownIntent(pub String);

impl FromStr for IntentLabel {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned = value
            .trim()
            .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '`' || ch == '.' || ch == '*')
            .trim()
            .to_ascii_lowercase();

        match cleaned.as_str() {
            "schedule" => Ok(Self::Schedule),
            "email" => Ok(Self::Email),
            "remind" | "reminder" => Ok(Self::Remind),
            "todo" => Ok(Self::Todo),
            "goal" => Ok(Self::Goal),
            "general" => Ok(Self::General),
            _ => Err(UnknownIntent(value.trim().to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IntentLabel, UnknownIntent};

    #[test]
    fn classifier_output_is_normalised() {
        assert_eq!(IntentLabel::from_classifier_output("Schedule"), IntentLabel::Schedule);
        assert_eq!(IntentLabel::from_classifier_output("  email.\n"), IntentLabel::Email);
        assert_eq!(IntentLabel::from_classifier_output("\"Todo\""), IntentLabel::Todo);
        assert_eq!(IntentLabel::from_classifier_output("Reminder"), IntentLabel::Remind);
    }

    #[test]
    fn unrecognised_label_falls_back_to_general() {
        assert_eq!(IntentLabel::from_classifier_output("Weather"), IntentLabel::General);
        assert_eq!(IntentLabel::from_classifier_output(""), IntentLabel::General);
        assert_eq!(
            IntentLabel::from_classifier_output("Schedule or Email"),
            IntentLabel::General
        );
    }

    #[test]
    fn only_general_is_not_actionable() {
        let actionable: Vec<_> =
            IntentLabel::ALL.into_iter().filter(|label| label.is_actionable()).collect();
        assert_eq!(actionable.len(), 5);
        assert!(!IntentLabel::General.is_actionable());
    }

    #[test]
    fn strict_parse_reports_the_unknown_label() {
        let error = "Weather".parse::<IntentLabel>().expect_err("not a label");
        assert_eq!(error, UnknownIntent("Weather".to_owned()));
        assert_eq!(error.to_string(), "unknown intent label `Weather`");
        assert_eq!(" remind ".parse::<IntentLabel>(), Ok(IntentLabel::Remind));
    }
}
