use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    Bn,
    En,
}

impl Locale {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bn" | "bangla" | "bengali" => Some(Locale::Bn),
            "en" | "english" => Some(Locale::En),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Bn => "bn",
            Locale::En => "en",
        }
    }
}

/// How the question reached the system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Modality {
    #[default]
    Text,
    Voice,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "Text",
            Modality::Voice => "Voice",
            Modality::Image => "Image",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Modality::Text),
            "voice" => Some(Modality::Voice),
            "image" => Some(Modality::Image),
            _ => None,
        }
    }

    /// Image attachments win over voice capture, which wins over the declared type.
    pub fn resolve(has_image: bool, is_voice: bool, declared: Option<Modality>) -> Self {
        if has_image {
            Modality::Image
        } else if is_voice {
            Modality::Voice
        } else {
            declared.unwrap_or(Modality::Text)
        }
    }
}

/// A farmer's question. Immutable once created.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Query {
    text: String,
    locale: Locale,
    modality: Modality,
    user_location: String,
    asked_at: String, // RFC3339
}

impl Query {
    pub fn new(
        text: &str,
        locale: Locale,
        modality: Modality,
        user_location: &str,
    ) -> Result<Self, AppError> {
        let asked_at = now_rfc3339_utc()?;
        Self::at(text, locale, modality, user_location, &asked_at)
    }

    pub fn at(
        text: &str,
        locale: Locale,
        modality: Modality,
        user_location: &str,
        asked_at: &str,
    ) -> Result<Self, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::new("QUERY_INVALID", "Query text must not be empty"));
        }
        let user_location = match user_location.trim() {
            "" => "Bangladesh",
            loc => loc,
        };
        Ok(Self {
            text: text.to_string(),
            locale,
            modality,
            user_location: user_location.to_string(),
            asked_at: asked_at.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn user_location(&self) -> &str {
        &self.user_location
    }

    pub fn asked_at(&self) -> &str {
        &self.asked_at
    }
}

/// A row of the durable query log as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub id: u64,
    pub user_contact: String,
    pub clinic_or_region: String,
    pub modality: String,
    pub query_text: String,
    pub answer_text: String,
    pub created_at: String, // RFC3339
}

/// A record submitted for persistence; the store assigns `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLogRecord {
    pub user_contact: String,
    pub clinic_or_region: String,
    pub modality: Modality,
    pub query_text: String,
    pub answer_text: String,
    pub created_at: String,
}

impl NewLogRecord {
    pub fn validate(&self) -> Result<(), AppError> {
        let missing: Vec<&str> = [
            ("user_contact", &self.user_contact),
            ("clinic_or_region", &self.clinic_or_region),
            ("query_text", &self.query_text),
            ("answer_text", &self.answer_text),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
        if !missing.is_empty() {
            return Err(AppError::new("LOG_RECORD_INVALID", "Missing required fields")
                .with_details(format!("fields={}", missing.join(","))));
        }
        Ok(())
    }
}

/// Guess the answer language of a transcript from its script.
///
/// Bengali-block characters are counted against ASCII letters; ties and empty input
/// default to Bangla.
pub fn detect_locale(text: &str) -> Locale {
    let mut bangla = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if ('\u{0980}'..='\u{09FF}').contains(&c) {
            bangla += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    if latin > bangla {
        Locale::En
    } else {
        Locale::Bn
    }
}

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string()))
}
