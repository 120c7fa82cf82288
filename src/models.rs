use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Which personnel group a form targets. Also used as a personnel's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Audience {
    Teaching,
    NonTeaching,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Teaching => "teaching",
            Audience::NonTeaching => "non-teaching",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "teaching" => Ok(Audience::Teaching),
            "non-teaching" | "nonteaching" => Ok(Audience::NonTeaching),
            other => Err(Error::Validation(format!(
                "unknown personnel type {other:?}, expected teaching or non-teaching"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleOption {
    pub value: i32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub items: Vec<String>,
}

/// Form definition as supplied by an administrator, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvaluationForm {
    pub name: String,
    pub audience: Audience,
    pub sections: Vec<Section>,
    pub scale: Vec<ScaleOption>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub school_year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationForm {
    pub id: Uuid,
    pub name: String,
    pub audience: Audience,
    pub sections: Vec<Section>,
    pub scale: Vec<ScaleOption>,
    pub semester: Option<String>,
    pub school_year: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationForm {
    pub fn has_item(&self, section: &str, item: &str) -> bool {
        self.sections
            .iter()
            .any(|s| s.title == section && s.items.iter().any(|i| i == item))
    }

    pub fn accepts_score(&self, score: i32) -> bool {
        self.scale.iter().any(|option| option.value == score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub section: String,
    pub item: String,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvaluationResponse {
    pub form_id: Uuid,
    pub respondent_name: String,
    pub respondent_email: String,
    #[serde(default)]
    pub evaluatee_id: Option<Uuid>,
    pub semester: String,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub id: Uuid,
    pub form_id: Uuid,
    pub respondent_name: String,
    pub respondent_email: String,
    pub evaluatee_id: Option<Uuid>,
    pub semester: String,
    pub answers: Vec<Answer>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportItem {
    pub section: String,
    pub item: String,
    pub average_score: f64,
    pub percentage: f64,
    pub respondent_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSummary {
    pub section: String,
    pub items: Vec<ReportItem>,
    pub sum_average: f64,
    pub sum_percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GrandTotal {
    pub sum_average: f64,
    pub sum_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub form_id: Uuid,
    pub form_name: Option<String>,
    pub semester: Option<String>,
    pub total_responses: usize,
    pub items: Vec<ReportItem>,
    pub sections: Vec<SectionSummary>,
    pub grand_total: GrandTotal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personnel {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub personnel_type: Audience,
    pub department: Option<String>,
    pub position: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Personnel {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPersonnel {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub personnel_type: Audience,
    pub department: Option<String>,
    pub position: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub email: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_parses_loose_spellings() {
        assert_eq!("Teaching".parse::<Audience>().unwrap(), Audience::Teaching);
        assert_eq!(
            "non_teaching".parse::<Audience>().unwrap(),
            Audience::NonTeaching
        );
        assert_eq!(
            " NON-TEACHING ".parse::<Audience>().unwrap(),
            Audience::NonTeaching
        );
        assert!("janitorial".parse::<Audience>().is_err());
    }

    #[test]
    fn form_definition_reads_from_json() {
        let raw = r#"{
            "name": "Faculty Evaluation",
            "audience": "teaching",
            "sections": [{"title": "A", "items": ["Q1", "Q2"]}],
            "scale": [{"value": 1, "label": "Poor"}, {"value": 5, "label": "Excellent"}]
        }"#;
        let form: NewEvaluationForm = serde_json::from_str(raw).expect("parse form");
        assert_eq!(form.audience, Audience::Teaching);
        assert_eq!(form.sections[0].items, vec!["Q1", "Q2"]);
        assert!(form.semester.is_none());
    }
}
