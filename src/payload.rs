use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;

// -----------------------------------------------------------------------------
// Models & DTOs
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstancesPayload {
    pub instances: Vec<LabelFilter>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LabelFilter {
    #[serde(default)]
    pub labels: String,
}

#[derive(Debug, PartialEq)]
pub struct ValidationError(String);

impl Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Decodes a base64 request body and checks that it carries `instances`.
///
/// Only `instances` is checked. Each entry's `labels` is rendered to text and
/// left for the provider to accept or reject.
pub fn validate_payload(body: &[u8]) -> Result<InstancesPayload, ValidationError> {
    let decoded = LENIENT_BASE64
        .decode(normalize_base64(body))
        .map_err(|err| ValidationError(format!("Invalid message: {}", err)))?;

    let payload: Value = serde_json::from_slice(&decoded)
        .map_err(|err| ValidationError(format!("Invalid message: {}", err)))?;

    match payload.get("instances") {
        None => Err(required_error()),
        Some(instances) if is_falsy(instances) => Err(required_error()),
        Some(Value::Array(entries)) => Ok(InstancesPayload {
            instances: entries
                .iter()
                .map(|entry| LabelFilter {
                    labels: label_text(entry.get("labels")),
                })
                .collect(),
        }),
        Some(_) => Err(ValidationError(
            "Attribute 'instances' must be an array".to_string(),
        )),
    }
}

/// Drops whitespace (line-wrapped bodies) and maps the URL-safe alphabet onto the standard one.
fn normalize_base64(body: &[u8]) -> Vec<u8> {
    body.iter()
        .filter(|byte| !byte.is_ascii_whitespace())
        .map(|byte| match byte {
            b'-' => b'+',
            b'_' => b'/',
            other => *other,
        })
        .collect()
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn label_text(labels: Option<&Value>) -> String {
    match labels {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn required_error() -> ValidationError {
    ValidationError("Attribute 'instances' is required".to_string())
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
