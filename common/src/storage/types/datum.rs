use chrono::SecondsFormat;
use uuid::Uuid;

use crate::{error::AppError, stored_object};

use super::deduplicator_descriptor::DeduplicatorDescriptor;

/// Type-specific payload of a device reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    Cbg {
        value: f64,
        units: String,
    },
    Smbg {
        value: f64,
        units: String,
    },
    Basal {
        delivery_type: String,
        rate: f64,
        duration_ms: i64,
    },
    Bolus {
        sub_type: String,
        normal: f64,
    },
}

impl Measurement {
    pub fn type_name(&self) -> &'static str {
        match self {
            Measurement::Cbg { .. } => "cbg",
            Measurement::Smbg { .. } => "smbg",
            Measurement::Basal { .. } => "basal",
            Measurement::Bolus { .. } => "bolus",
        }
    }

    fn identity_fields(&self) -> Vec<String> {
        match self {
            Measurement::Cbg { value, units } | Measurement::Smbg { value, units } => {
                vec![units.clone(), value.to_string()]
            }
            Measurement::Basal {
                delivery_type,
                rate,
                duration_ms,
            } => vec![
                delivery_type.clone(),
                rate.to_string(),
                duration_ms.to_string(),
            ],
            Measurement::Bolus { sub_type, normal } => vec![sub_type.clone(), normal.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Origin {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Where a datum was parsed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    pub raw_id: String,
    pub raw_revision: i64,
    pub reference: String,
}

stored_object!(Datum, "datum", {
    user_id: Option<String>,
    dataset_id: Option<String>,
    device_id: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    device_time: DateTime<Utc>,
    measurement: Measurement,
    #[serde(default)]
    active: bool,
    deduplicator: Option<DeduplicatorDescriptor>,
    origin: Option<Origin>,
    provenance: Option<Provenance>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    archived_time: Option<DateTime<Utc>>,
    archived_dataset_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    modified_time: Option<DateTime<Utc>>
});

impl Datum {
    pub fn new(device_time: DateTime<Utc>, measurement: Measurement) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: None,
            dataset_id: None,
            device_id: None,
            device_time,
            measurement,
            active: false,
            deduplicator: None,
            origin: None,
            provenance: None,
            archived_time: None,
            archived_dataset_id: None,
            modified_time: None,
        }
    }

    pub fn with_origin(mut self, origin_id: &str) -> Self {
        self.origin = Some(Origin {
            id: origin_id.to_string(),
            name: None,
        });
        self
    }

    pub fn origin_id(&self) -> Option<&str> {
        self.origin
            .as_ref()
            .map(|origin| origin.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn identity_hash(&self) -> Option<&str> {
        self.deduplicator
            .as_ref()
            .and_then(|descriptor| descriptor.hash.as_deref())
    }

    /// Ordered identity fields: owner, device, time, type, then type-specific values.
    pub fn identity_fields(&self) -> Result<Vec<String>, AppError> {
        let user_id = self
            .user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation(format!("datum {} has no user id", self.id)))?;
        let device_id = self
            .device_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation(format!("datum {} has no device id", self.id)))?;

        let mut fields = vec![
            user_id.to_string(),
            device_id.to_string(),
            self.device_time
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            self.measurement.type_name().to_string(),
        ];
        fields.extend(self.measurement.identity_fields());
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading() -> Datum {
        let time = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid time");
        let mut datum = Datum::new(
            time,
            Measurement::Smbg {
                value: 5.5,
                units: "mmol/L".into(),
            },
        );
        datum.user_id = Some("user-1".into());
        datum.device_id = Some("meter-1".into());
        datum
    }

    #[test]
    fn identity_fields_follow_type_order() {
        let fields = reading().identity_fields().expect("fields");
        assert_eq!(
            fields,
            vec![
                "user-1".to_string(),
                "meter-1".to_string(),
                "2024-03-01T12:00:00.000Z".to_string(),
                "smbg".to_string(),
                "mmol/L".to_string(),
                "5.5".to_string(),
            ]
        );
    }

    #[test]
    fn identity_fields_require_device() {
        let mut datum = reading();
        datum.device_id = None;
        assert!(matches!(
            datum.identity_fields(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn empty_origin_id_is_ignored() {
        let datum = reading().with_origin("");
        assert!(datum.origin_id().is_none());
        let datum = reading().with_origin("origin-7");
        assert_eq!(datum.origin_id(), Some("origin-7"));
    }
}
