//! Patient and consultation metadata.
//!
//! [`PatientForm`] is the raw submission (every field a string, possibly
//! blank). [`PatientForm::validate`] is the only way to obtain a
//! [`PatientInfo`], so anything holding a `PatientInfo` can assume the
//! required fields are present and the date is a real calendar date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Date format used on forms and inside reports.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Modality used when the form leaves it blank.
pub const DEFAULT_VISIT_MODALITY: &str = "Presencial";

/// Every key produced by [`PatientInfo::to_field_map`].
pub const FIELD_KEYS: [&str; 20] = [
    "patient_name",
    "species",
    "breed",
    "age_weight",
    "tutor_name",
    "consultation_date",
    "visit_reason",
    "visit_modality",
    "vet_name",
    "vet_crmv",
    "vet_specialty",
    "temperature",
    "heart_rate",
    "respiratory_rate",
    "capillary_refill",
    "mucous_membranes",
    "hydration",
    "lymph_nodes",
    "medications",
    "exam_results",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field is empty: {label}")]
    MissingField {
        field: &'static str,
        label: &'static str,
    },

    #[error("Invalid date: {0}. Use the DD/MM/YYYY format")]
    InvalidDate(String),
}

impl ValidationError {
    /// Machine name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field, .. } => field,
            ValidationError::InvalidDate(_) => "consultation_date",
        }
    }
}

/// Raw consultation form as submitted by the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientForm {
    pub patient_name: String,
    pub species: String,
    pub breed: String,
    pub age_weight: String,
    pub tutor_name: String,
    /// DD/MM/YYYY; blank means today.
    pub consultation_date: Option<String>,
    pub visit_reason: String,
    pub visit_modality: String,
    #[serde(flatten)]
    pub clinical: ClinicalFindings,
}

/// Optional clinical fields. Blank values are left for the generation
/// provider to infer from the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalFindings {
    pub vet_name: String,
    pub vet_crmv: String,
    pub vet_specialty: String,
    pub temperature: String,
    pub heart_rate: String,
    pub respiratory_rate: String,
    pub capillary_refill: String,
    pub mucous_membranes: String,
    pub hydration: String,
    pub lymph_nodes: String,
    pub medications: String,
    pub exam_results: String,
}

impl ClinicalFindings {
    fn trimmed(&self) -> Self {
        Self {
            vet_name: self.vet_name.trim().to_string(),
            vet_crmv: self.vet_crmv.trim().to_string(),
            vet_specialty: self.vet_specialty.trim().to_string(),
            temperature: self.temperature.trim().to_string(),
            heart_rate: self.heart_rate.trim().to_string(),
            respiratory_rate: self.respiratory_rate.trim().to_string(),
            capillary_refill: self.capillary_refill.trim().to_string(),
            mucous_membranes: self.mucous_membranes.trim().to_string(),
            hydration: self.hydration.trim().to_string(),
            lymph_nodes: self.lymph_nodes.trim().to_string(),
            medications: self.medications.trim().to_string(),
            exam_results: self.exam_results.trim().to_string(),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 12] {
        [
            ("vet_name", &self.vet_name),
            ("vet_crmv", &self.vet_crmv),
            ("vet_specialty", &self.vet_specialty),
            ("temperature", &self.temperature),
            ("heart_rate", &self.heart_rate),
            ("respiratory_rate", &self.respiratory_rate),
            ("capillary_refill", &self.capillary_refill),
            ("mucous_membranes", &self.mucous_membranes),
            ("hydration", &self.hydration),
            ("lymph_nodes", &self.lymph_nodes),
            ("medications", &self.medications),
            ("exam_results", &self.exam_results),
        ]
    }
}

/// Validated, immutable consultation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientInfo {
    patient_name: String,
    species: String,
    breed: String,
    age_weight: String,
    tutor_name: String,
    consultation_date: NaiveDate,
    visit_reason: String,
    visit_modality: String,
    clinical: ClinicalFindings,
}

impl PatientForm {
    /// Validate against today's local date.
    pub fn validate(&self) -> Result<PatientInfo, ValidationError> {
        self.validate_on(chrono::Local::now().date_naive())
    }

    /// Validate, using `today` when no consultation date was supplied.
    pub fn validate_on(&self, today: NaiveDate) -> Result<PatientInfo, ValidationError> {
        let required: [(&'static str, &'static str, &str); 6] = [
            ("patient_name", "Patient name", &self.patient_name),
            ("species", "Patient species", &self.species),
            ("breed", "Patient breed", &self.breed),
            ("age_weight", "Patient age/weight", &self.age_weight),
            ("tutor_name", "Tutor name", &self.tutor_name),
            ("visit_reason", "Visit reason", &self.visit_reason),
        ];

        for (field, label, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField { field, label });
            }
        }

        let consultation_date = match self
            .consultation_date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            Some(raw) => parse_form_date(raw)?,
            None => today,
        };

        let visit_modality = match self.visit_modality.trim() {
            "" => DEFAULT_VISIT_MODALITY.to_string(),
            other => other.to_string(),
        };

        log::debug!("Patient info validated for {}", self.patient_name.trim());

        Ok(PatientInfo {
            patient_name: self.patient_name.trim().to_string(),
            species: self.species.trim().to_string(),
            breed: self.breed.trim().to_string(),
            age_weight: self.age_weight.trim().to_string(),
            tutor_name: self.tutor_name.trim().to_string(),
            consultation_date,
            visit_reason: self.visit_reason.trim().to_string(),
            visit_modality,
            clinical: self.clinical.trimmed(),
        })
    }
}

/// Parse a strict `DD/MM/YYYY` date.
///
/// chrono accepts single-digit days and months for `%d`/`%m`, so the shape is
/// checked first.
pub fn parse_form_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            2 | 5 => *b == b'/',
            _ => b.is_ascii_digit(),
        });

    if !well_formed {
        return Err(ValidationError::InvalidDate(raw.to_string()));
    }

    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

impl PatientInfo {
    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    pub fn species(&self) -> &str {
        &self.species
    }

    pub fn breed(&self) -> &str {
        &self.breed
    }

    pub fn age_weight(&self) -> &str {
        &self.age_weight
    }

    pub fn tutor_name(&self) -> &str {
        &self.tutor_name
    }

    pub fn consultation_date(&self) -> NaiveDate {
        self.consultation_date
    }

    pub fn visit_reason(&self) -> &str {
        &self.visit_reason
    }

    pub fn visit_modality(&self) -> &str {
        &self.visit_modality
    }

    pub fn clinical(&self) -> &ClinicalFindings {
        &self.clinical
    }

    /// Placeholder values for prompt templates.
    ///
    /// Every key is always present; optional clinical fields map to an empty
    /// string when they were left blank.
    pub fn to_field_map(&self) -> HashMap<&'static str, String> {
        let mut fields = HashMap::with_capacity(20);
        fields.insert("patient_name", self.patient_name.clone());
        fields.insert("species", self.species.clone());
        fields.insert("breed", self.breed.clone());
        fields.insert("age_weight", self.age_weight.clone());
        fields.insert("tutor_name", self.tutor_name.clone());
        fields.insert(
            "consultation_date",
            self.consultation_date.format(DATE_FORMAT).to_string(),
        );
        fields.insert("visit_reason", self.visit_reason.clone());
        fields.insert("visit_modality", self.visit_modality.clone());
        for (key, value) in self.clinical.entries() {
            fields.insert(key, value.to_string());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form() -> PatientForm {
        PatientForm {
            patient_name: "Bob".to_string(),
            species: "Cão".to_string(),
            breed: "Yorkshire Terrier".to_string(),
            age_weight: "5 anos, 3.2kg".to_string(),
            tutor_name: "Maria Silva".to_string(),
            consultation_date: Some("15/11/2025".to_string()),
            visit_reason: "Acompanhamento dermatite".to_string(),
            visit_modality: "Presencial".to_string(),
            clinical: ClinicalFindings::default(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).unwrap()
    }

    #[test]
    fn test_valid_form() {
        let info = sample_form().validate_on(today()).unwrap();
        assert_eq!(info.patient_name(), "Bob");
        assert_eq!(
            info.consultation_date(),
            NaiveDate::from_ymd_opt(2025, 11, 15).unwrap()
        );
    }

    #[test]
    fn test_each_required_field_is_named() {
        let cases: [(&str, fn(&mut PatientForm)); 6] = [
            ("patient_name", |f| f.patient_name = "   ".to_string()),
            ("species", |f| f.species.clear()),
            ("breed", |f| f.breed = "\t".to_string()),
            ("age_weight", |f| f.age_weight.clear()),
            ("tutor_name", |f| f.tutor_name = " \n ".to_string()),
            ("visit_reason", |f| f.visit_reason.clear()),
        ];

        for (expected, blank) in cases {
            let mut form = sample_form();
            blank(&mut form);
            let err = form.validate_on(today()).unwrap_err();
            assert_eq!(err.field(), expected);
            assert!(matches!(err, ValidationError::MissingField { .. }));
        }
    }

    #[test]
    fn test_missing_date_defaults_to_today() {
        for date in [None, Some(String::new()), Some("  ".to_string())] {
            let mut form = sample_form();
            form.consultation_date = date;
            let info = form.validate_on(today()).unwrap();
            assert_eq!(info.consultation_date(), today());
        }
    }

    #[test]
    fn test_invalid_dates_rejected() {
        for raw in ["32/13/2025", "29/02/2025", "1/1/2025", "2025-11-15", "15/11/25", "aa/bb/cccc"] {
            let mut form = sample_form();
            form.consultation_date = Some(raw.to_string());
            let err = form.validate_on(today()).unwrap_err();
            assert_eq!(err, ValidationError::InvalidDate(raw.to_string()));
        }
    }

    #[test]
    fn test_leap_day_accepted() {
        let mut form = sample_form();
        form.consultation_date = Some("29/02/2024".to_string());
        assert!(form.validate_on(today()).is_ok());
    }

    #[test]
    fn test_field_map_has_every_key() {
        let mut form = sample_form();
        form.visit_modality.clear();
        form.clinical.temperature = " 38.5°C ".to_string();
        let fields = form.validate_on(today()).unwrap().to_field_map();

        assert_eq!(fields.len(), FIELD_KEYS.len());
        assert!(FIELD_KEYS.iter().all(|k| fields.contains_key(k)));
        assert_eq!(fields["consultation_date"], "15/11/2025");
        assert_eq!(fields["visit_modality"], DEFAULT_VISIT_MODALITY);
        assert_eq!(fields["temperature"], "38.5°C");
        assert_eq!(fields["medications"], "");
    }

    #[test]
    fn test_form_deserializes_from_flat_json() {
        let form: PatientForm = serde_json::from_str(
            r#"{"patient_name":"Bob","species":"Gato","medications":"Omeprazol 20mg"}"#,
        )
        .unwrap();
        assert_eq!(form.species, "Gato");
        assert_eq!(form.clinical.medications, "Omeprazol 20mg");
        assert!(form.consultation_date.is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_calendar_dates_always_parse(
                y in 1900i32..2100,
                m in 1u32..=12,
                d in 1u32..=28,
            ) {
                let raw = format!("{:02}/{:02}/{:04}", d, m, y);
                let parsed = parse_form_date(&raw).unwrap();
                prop_assert_eq!(parsed, NaiveDate::from_ymd_opt(y, m, d).unwrap());
            }

            #[test]
            fn out_of_range_months_never_parse(d in 1u32..=28, m in 13u32..=99, y in 1900i32..2100) {
                let raw = format!("{:02}/{:02}/{:04}", d, m, y);
                prop_assert!(parse_form_date(&raw).is_err());
            }
        }
    }
}
