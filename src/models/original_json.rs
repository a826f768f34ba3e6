use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where an entity came from.
///
/// Locally authored entities have source `local` and no `source_url`;
/// imported entities keep the URL they were fetched from and the JSON they
/// were imported as.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub source: String,
    pub source_url: Option<String>,
    pub original_json: Option<String>,
}

impl Default for Provenance {
    fn default() -> Self {
        Provenance {
            source: "local".to_owned(),
            source_url: None,
            original_json: None,
        }
    }
}

impl Provenance {
    pub fn imported(source: &str, source_url: &str, original_json: &Value) -> Self {
        Provenance {
            source: source.to_owned(),
            source_url: Some(source_url.to_owned()),
            original_json: Some(original_json.to_string()),
        }
    }

    pub fn is_imported(&self) -> bool {
        self.source_url.is_some()
    }
}

/// Access to the JSON an entity was imported as.
pub trait OriginalJson {
    fn provenance(&self) -> &Provenance;

    /// Canonical field names import passthrough must never override.
    fn excluded_fields(&self) -> &'static [&'static str];

    /// Parsed original JSON; unparsable text is treated as absent.
    fn get_original_json(&self) -> Option<Value> {
        let text = self.provenance().original_json.as_deref()?;
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("ignoring malformed original json: {e}");
                None
            }
        }
    }

    /// Original JSON object without the canonical fields.
    fn get_filtered_json(&self) -> Option<Map<String, Value>> {
        match self.get_original_json()? {
            Value::Object(original) => Some(
                original
                    .into_iter()
                    .filter(|(k, _)| !self.excluded_fields().contains(&k.as_str()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// The `image` sub-object of the original JSON, when it is an object.
    fn original_image_info(&self) -> Option<Map<String, Value>> {
        match self.get_original_json()?.get("image") {
            Some(Value::Object(info)) => Some(info.clone()),
            _ => None,
        }
    }
}

/// Normalizes an imported timestamp to an RFC 3339 UTC string with a `Z` suffix.
///
/// Timestamps without a zone are taken as UTC. Returns `None` when the value
/// is not a recognizable timestamp.
pub fn parse_original_datetime(value: &str) -> Option<String> {
    let value = value.trim();

    let parsed: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        });

    parsed.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}
