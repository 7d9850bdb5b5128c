//! UI noise filter: timestamps, read receipts, date separators and status
//! tokens that chat apps render next to the actual messages.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::ContentLine;
use crate::ocr::RawTextLine;

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d{1,2}[:.]\d{2}(\s*[ap]\.?\s?m\.?)?(\s*[✓✔√vVwWjJ4/]{1,3})?$")
        .expect("timestamp pattern")
});

static RECEIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[✓✔√vVwWjJ4/\\]{1,4}$").expect("receipt pattern"));

const MONTHS: &str = "jan(uary)?|feb(ruary)?|mar(ch)?|apr(il)?|may|june?|july?|aug(ust)?|sep(t(ember)?)?|oct(ober)?|nov(ember)?|dec(ember)?";

static DATES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(&format!(r"(?i)^\d{{1,2}}\s+({MONTHS})\.?,?\s+\d{{4}}$")).expect("date pattern"),
        Regex::new(&format!(r"(?i)^({MONTHS})\.?\s+\d{{1,2}},?\s+\d{{4}}$")).expect("date pattern"),
        Regex::new(r"^\d{1,2}/\d{1,2}/\d{2,4}$").expect("date pattern"),
    ]
});

static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").expect("number pattern"));

const UI_TOKENS: &[&str] = &[
    "today",
    "yesterday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
    "delivered",
    "read",
    "seen",
    "typing",
    "online",
];

/// Why a line was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReason {
    TooShort,
    Timestamp,
    ReceiptArtifact,
    Date,
    UiToken,
    BareNumber,
}

#[derive(Debug, Clone, Default)]
pub struct NoiseFilter;

impl NoiseFilter {
    pub fn new() -> Self {
        Self
    }

    /// Returns the reason `text` is noise, or `None` for message content.
    pub fn classify(&self, text: &str) -> Option<NoiseReason> {
        let text = text.trim();
        if text.chars().count() < 2 {
            return Some(NoiseReason::TooShort);
        }
        if TIMESTAMP.is_match(text) {
            return Some(NoiseReason::Timestamp);
        }
        if RECEIPT.is_match(text) {
            return Some(NoiseReason::ReceiptArtifact);
        }
        if DATES.iter().any(|re| re.is_match(text)) {
            return Some(NoiseReason::Date);
        }
        if BARE_NUMBER.is_match(text) {
            return Some(NoiseReason::BareNumber);
        }
        let token = text
            .trim_end_matches(['.', '…', '!', ','])
            .to_lowercase();
        if UI_TOKENS.contains(&token.as_str()) {
            return Some(NoiseReason::UiToken);
        }
        None
    }

    /// Drop noise from provider lines, preserving order.
    pub fn filter(&self, raw: &[RawTextLine]) -> Vec<ContentLine> {
        raw.iter()
            .filter(|line| self.keep(&line.text))
            .map(ContentLine::from_raw)
            .collect()
    }

    /// Same predicate over already-filtered lines; a second pass is a no-op.
    pub fn filter_content(&self, lines: &[ContentLine]) -> Vec<ContentLine> {
        lines
            .iter()
            .filter(|line| self.keep(&line.text))
            .cloned()
            .collect()
    }

    fn keep(&self, text: &str) -> bool {
        match self.classify(text) {
            Some(reason) => {
                debug!(text, reason = ?reason, "noise_line_dropped");
                false
            }
            None => true,
        }
    }
}
