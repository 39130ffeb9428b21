use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use url::Url;

/// Kind of a tracked event.
///
/// The set is open: any name other than `pageview` or `conversion` is kept
/// verbatim as a custom event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Pageview,
    Conversion,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pageview => "pageview",
            Self::Conversion => "conversion",
            Self::Custom(name) => name,
        }
    }

    pub const fn is_pageview(&self) -> bool {
        matches!(self, Self::Pageview)
    }

    pub const fn is_conversion(&self) -> bool {
        matches!(self, Self::Conversion)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "pageview" => Self::Pageview,
            "conversion" => Self::Conversion,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// A single normalized analytics event, as stored and as consumed by the
/// aggregation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub site_id: String,
    pub session_id: String,
    pub visitor_id: String,
    pub event_type: EventType,
    pub url: String,
    #[serde(default, rename = "referrer")]
    pub referrer_url: Option<String>,
    #[serde(default)]
    pub page_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    /// Page URL, falling back to `properties.url` when the field is blank.
    pub fn page_url(&self) -> Option<&str> {
        non_blank(&self.url).or_else(|| self.property_str("url"))
    }

    /// Referring URL, falling back to `properties.referrer`.
    pub fn referrer(&self) -> Option<&str> {
        self.referrer_url
            .as_deref()
            .and_then(non_blank)
            .or_else(|| self.property_str("referrer"))
    }

    /// Page path: the stored `page_path`, or one parsed out of the URL.
    ///
    /// Returns `None` when neither is usable.
    pub fn path(&self) -> Option<Cow<'_, str>> {
        if let Some(path) = self.page_path.as_deref().and_then(non_blank) {
            return Some(Cow::Borrowed(path));
        }
        self.page_url().and_then(path_from_url).map(Cow::Owned)
    }

    /// Hostname of the referrer with a leading `www.` removed.
    pub fn referrer_domain(&self) -> Option<String> {
        self.referrer().and_then(referrer_domain)
    }

    fn property_str(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .and_then(non_blank)
    }
}

fn non_blank(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Extract the path component of an absolute or root-relative URL.
///
/// Query string and fragment are dropped. Returns `None` for input that does
/// not parse as a hierarchical URL.
pub fn path_from_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let url = if raw.starts_with('/') && !raw.starts_with("//") {
        Url::parse("http://localhost")
            .and_then(|base| base.join(raw))
            .ok()?
    } else {
        Url::parse(raw).ok()?
    };
    if url.cannot_be_a_base() {
        return None;
    }
    Some(url.path().to_string())
}

/// Extract the referrer domain: lowercased hostname without a leading `www.`.
pub fn referrer_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}
