use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::datum::{Datum, Measurement, Origin},
};
use serde::Deserialize;
use serde_json::Value;

const BLOOD_GLUCOSE_UNITS: [&str; 2] = ["mg/dL", "mmol/L"];

/// A structural or validation problem with one reading of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// JSON pointer of the offending element within the payload.
    pub reference: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ParsedDatum {
    pub index: usize,
    pub datum: Datum,
}

/// The outcome of parsing one raw payload: the readings that validated and
/// the ones that did not.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub data: Vec<ParsedDatum>,
    pub issues: Vec<ParseIssue>,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawReading {
    time: DateTime<Utc>,
    #[serde(default)]
    origin: Option<RawOrigin>,
    #[serde(flatten)]
    measurement: RawMeasurement,
}

#[derive(Debug, Deserialize)]
struct RawOrigin {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawMeasurement {
    Cbg {
        value: f64,
        units: String,
    },
    Smbg {
        value: f64,
        units: String,
    },
    #[serde(rename_all = "camelCase")]
    Basal {
        delivery_type: String,
        rate: f64,
        duration: i64,
    },
    #[serde(rename_all = "camelCase")]
    Bolus {
        sub_type: String,
        normal: f64,
    },
}

impl RawMeasurement {
    fn validate(self) -> Result<Measurement, String> {
        match self {
            RawMeasurement::Cbg { value, units } => {
                validate_glucose(value, &units)?;
                Ok(Measurement::Cbg { value, units })
            }
            RawMeasurement::Smbg { value, units } => {
                validate_glucose(value, &units)?;
                Ok(Measurement::Smbg { value, units })
            }
            RawMeasurement::Basal {
                delivery_type,
                rate,
                duration,
            } => {
                if delivery_type.trim().is_empty() {
                    return Err("deliveryType must not be empty".to_string());
                }
                validate_amount("rate", rate)?;
                if duration < 0 {
                    return Err(format!("duration must not be negative, got {duration}"));
                }
                Ok(Measurement::Basal {
                    delivery_type,
                    rate,
                    duration_ms: duration,
                })
            }
            RawMeasurement::Bolus { sub_type, normal } => {
                if sub_type.trim().is_empty() {
                    return Err("subType must not be empty".to_string());
                }
                validate_amount("normal", normal)?;
                Ok(Measurement::Bolus { sub_type, normal })
            }
        }
    }
}

fn validate_glucose(value: f64, units: &str) -> Result<(), String> {
    if !BLOOD_GLUCOSE_UNITS.contains(&units) {
        return Err(format!("unsupported units {units:?}"));
    }
    validate_amount("value", value)
}

fn validate_amount(field: &str, amount: f64) -> Result<(), String> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("{field} must be a non-negative number, got {amount}"));
    }
    Ok(())
}

/// Parses uploaded device payloads: a JSON array of typed readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDatumParser;

impl JsonDatumParser {
    pub fn new() -> Self {
        Self
    }

    /// Fails only when the payload as a whole is unusable; individual
    /// readings that do not validate are reported in `ParsedBatch::issues`.
    pub fn parse(&self, content: &[u8], reference: &str) -> Result<ParsedBatch, AppError> {
        let payload: Value = serde_json::from_slice(content)?;
        let Value::Array(elements) = payload else {
            return Err(AppError::Validation(format!(
                "raw content {reference} is not a JSON array"
            )));
        };

        let mut batch = ParsedBatch::default();
        for (index, element) in elements.into_iter().enumerate() {
            match parse_reading(element) {
                Ok(datum) => batch.data.push(ParsedDatum { index, datum }),
                Err(message) => batch.issues.push(ParseIssue {
                    reference: format!("/{index}"),
                    message,
                }),
            }
        }
        Ok(batch)
    }
}

fn parse_reading(element: Value) -> Result<Datum, String> {
    let reading: RawReading = serde_json::from_value(element).map_err(|err| err.to_string())?;
    let measurement = reading.measurement.validate()?;

    let mut datum = Datum::new(reading.time, measurement);
    if let Some(origin) = reading.origin {
        if origin.id.is_empty() {
            return Err("origin.id must not be empty".to_string());
        }
        datum.origin = Some(Origin {
            id: origin.id,
            name: origin.name,
        });
    }
    Ok(datum)
}
