//! Request classification for inbound message text.

pub const DEFAULT_TRIGGER_WORDS: &[&str] = &["ping", "test", "pink", "echo"];
pub const DEFAULT_INFO_WORDS: &[&str] = &["info", "help", "?"];

/// What the bot should do with a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Ignore,
    Info,
    Zipcode(String),
    Prefix(String),
    Ping,
}

impl RequestKind {
    /// True for every kind that produces a pong (as opposed to the info text).
    pub fn is_ping(&self) -> bool {
        matches!(
            self,
            RequestKind::Zipcode(_) | RequestKind::Prefix(_) | RequestKind::Ping
        )
    }
}

/// Matches message bodies against the info and trigger word lists.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    trigger_words: Vec<String>,
    info_words: Vec<String>,
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self {
            trigger_words: DEFAULT_TRIGGER_WORDS.iter().map(|w| w.to_string()).collect(),
            info_words: DEFAULT_INFO_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl RequestClassifier {
    /// Build from configured word lists; empty entries are dropped, case is folded.
    pub fn new(trigger_words: &[String], info_words: &[String]) -> Self {
        let normalize = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            trigger_words: normalize(trigger_words),
            info_words: normalize(info_words),
        }
    }

    /// Classify a message body (channel sender prefix already removed).
    ///
    /// Rules are checked in order: info word, five digit postal code, dialling prefix,
    /// trigger word. Anything else is ignored.
    pub fn classify(&self, body: &str) -> RequestKind {
        let trimmed = body.trim();
        let lowered = trimmed.to_lowercase();

        if self.info_words.iter().any(|w| lowered.starts_with(w.as_str())) {
            return RequestKind::Info;
        }
        if is_zipcode(trimmed) {
            return RequestKind::Zipcode(trimmed.to_string());
        }
        if is_prefix(trimmed) {
            return RequestKind::Prefix(trimmed.to_string());
        }
        if self
            .trigger_words
            .iter()
            .any(|w| lowered.starts_with(w.as_str()))
        {
            return RequestKind::Ping;
        }
        RequestKind::Ignore
    }
}

/// Exactly five ASCII digits.
pub fn is_zipcode(text: &str) -> bool {
    text.len() == 5 && text.bytes().all(|b| b.is_ascii_digit())
}

/// A leading `0` followed by two to four more digits (`040`, `0761`, `03327`).
pub fn is_prefix(text: &str) -> bool {
    (3..=5).contains(&text.len())
        && text.starts_with('0')
        && text.bytes().all(|b| b.is_ascii_digit())
}

/// Split channel text of the form `sender: body`.
///
/// Without a colon the whole text is the body and the sender is `unknown`.
pub fn split_channel_text(text: &str) -> (String, &str) {
    match text.split_once(':') {
        Some((sender, body)) => (sender.trim().to_string(), body.trim()),
        None => ("unknown".to_string(), text.trim()),
    }
}
