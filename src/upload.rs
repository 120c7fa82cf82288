use std::collections::HashSet;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Audience, NewPersonnel, Personnel};

pub const HEADER: [&str; 6] = [
    "first_name",
    "last_name",
    "email",
    "personnel_type",
    "department",
    "position",
];

/// One personnel record as entered, from a CSV row or the command line.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PersonnelRow {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub personnel_type: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Created,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub row: usize,
    pub email: Option<String>,
    pub status: RowStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub rows: Vec<RowOutcome>,
}

impl UploadSummary {
    fn push(&mut self, outcome: RowOutcome) {
        match outcome.status {
            RowStatus::Created => self.created += 1,
            RowStatus::Skipped => self.skipped += 1,
            RowStatus::Failed => self.failed += 1,
        }
        self.total += 1;
        self.rows.push(outcome);
    }

    /// Turns planned creations into skips for emails the store already
    /// held when the rows were written.
    pub fn mark_already_present(&mut self, emails: &[String]) {
        for outcome in &mut self.rows {
            let taken = outcome
                .email
                .as_ref()
                .is_some_and(|email| emails.contains(email));
            if outcome.status == RowStatus::Created && taken {
                outcome.status = RowStatus::Skipped;
                outcome.reason = Some(DUPLICATE_REASON.to_string());
                self.created -= 1;
                self.skipped += 1;
            }
        }
    }
}

const DUPLICATE_REASON: &str = "personnel with this email already exists";

/// Result of validating an upload before anything is written.
#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    pub to_create: Vec<NewPersonnel>,
    pub summary: UploadSummary,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Checks required fields, email shape and personnel type, trimming every
/// field. Shared by bulk upload and single additions.
pub fn validate_personnel(row: PersonnelRow) -> std::result::Result<NewPersonnel, String> {
    let first_name = row.first_name.trim().to_string();
    let last_name = row.last_name.trim().to_string();
    let email = normalize_email(&row.email);

    let mut missing = Vec::new();
    if first_name.is_empty() {
        missing.push("first_name");
    }
    if last_name.is_empty() {
        missing.push("last_name");
    }
    if email.is_empty() {
        missing.push("email");
    }
    if !missing.is_empty() {
        return Err(format!("missing required field(s): {}", missing.join(", ")));
    }
    if !is_valid_email(&email) {
        return Err(format!("invalid email {email:?}"));
    }

    let personnel_type = match non_empty(row.personnel_type) {
        Some(raw) => raw.parse::<Audience>().map_err(|err| err.to_string())?,
        None => Audience::Teaching,
    };

    Ok(NewPersonnel {
        first_name,
        last_name,
        email,
        personnel_type,
        department: non_empty(row.department),
        position: non_empty(row.position),
    })
}

/// Validates every row in order. Rows whose email is already in
/// `existing_emails` or earlier in the file are skipped. Row problems are
/// reported in the summary; only an unreadable source is an error.
pub fn plan_upload<R: Read>(source: R, existing_emails: &HashSet<String>) -> Result<UploadPlan> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source);
    let mut seen: HashSet<String> = existing_emails.iter().map(|e| normalize_email(e)).collect();
    let mut plan = UploadPlan::default();

    for (index, record) in reader.deserialize::<PersonnelRow>().enumerate() {
        let row = index + 1;
        let parsed = match record {
            Ok(parsed) => parsed,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                tracing::warn!(row, error = %err, "unreadable upload row");
                plan.summary.push(RowOutcome {
                    row,
                    email: None,
                    status: RowStatus::Failed,
                    reason: Some(format!("malformed row: {err}")),
                });
                continue;
            }
        };

        let raw_email = non_empty(Some(parsed.email.clone())).map(|e| normalize_email(&e));
        match validate_personnel(parsed) {
            Err(reason) => {
                tracing::warn!(row, %reason, "upload row failed validation");
                plan.summary.push(RowOutcome {
                    row,
                    email: raw_email,
                    status: RowStatus::Failed,
                    reason: Some(reason),
                });
            }
            Ok(person) if seen.contains(&person.email) => {
                tracing::warn!(row, email = %person.email, "skipping duplicate personnel");
                plan.summary.push(RowOutcome {
                    row,
                    email: Some(person.email),
                    status: RowStatus::Skipped,
                    reason: Some(DUPLICATE_REASON.to_string()),
                });
            }
            Ok(person) => {
                seen.insert(person.email.clone());
                plan.summary.push(RowOutcome {
                    row,
                    email: Some(person.email.clone()),
                    status: RowStatus::Created,
                    reason: None,
                });
                plan.to_create.push(person);
            }
        }
    }

    Ok(plan)
}

pub fn write_template<W: Write>(sink: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(HEADER)?;
    writer.flush()?;
    Ok(())
}

/// Writes personnel in the upload layout so an export can be re-imported.
pub fn write_personnel<W: Write>(sink: W, personnel: &[Personnel]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(sink);
    writer.write_record(HEADER)?;
    for person in personnel {
        writer.serialize(PersonnelRow {
            first_name: person.first_name.clone(),
            last_name: person.last_name.clone(),
            email: person.email.clone(),
            personnel_type: Some(person.personnel_type.to_string()),
            department: person.department.clone(),
            position: person.position.clone(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const HEADER_LINE: &str = "first_name,last_name,email,personnel_type,department,position\n";

    fn plan(body: &str, existing: &[&str]) -> UploadPlan {
        let existing: HashSet<String> = existing.iter().map(|e| e.to_string()).collect();
        plan_upload(format!("{HEADER_LINE}{body}").as_bytes(), &existing).expect("plan")
    }

    #[test]
    fn duplicate_emails_are_skipped() {
        let result = plan(
            "Avery,Lee,avery@school.test,teaching,Math,Teacher I\n\
             Jules,Moreno,jules@school.test,non-teaching,Registrar,Clerk\n\
             Avery,Lee,AVERY@school.test,teaching,Math,Teacher I\n\
             Kiara,Patel,kiara@school.test,,Science,\n",
            &["jules@school.test"],
        );

        let summary = &result.summary;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(result.to_create.len(), 2);
        assert_eq!(result.to_create[1].personnel_type, Audience::Teaching);
        assert_eq!(result.to_create[1].position, None);
        assert_eq!(summary.rows[2].status, RowStatus::Skipped);
        assert_eq!(summary.rows[2].row, 3);
    }

    #[test]
    fn validation_failures_are_collected_per_row() {
        let result = plan(
            ",Lee,avery@school.test,teaching,,\n\
             Jules,Moreno,not-an-email,teaching,,\n\
             Kiara,Patel,kiara@school.test,contractor,,\n\
             Rae,Cruz,rae@school.test,non_teaching,Library,Librarian\n",
            &[],
        );

        let summary = &result.summary;
        assert_eq!((summary.created, summary.skipped, summary.failed), (1, 0, 3));
        assert_eq!(
            summary.rows[0].reason.as_deref(),
            Some("missing required field(s): first_name")
        );
        assert!(summary.rows[1]
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("invalid email"));
        assert!(summary.rows[2]
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("contractor"));
        assert_eq!(result.to_create[0].personnel_type, Audience::NonTeaching);
    }

    #[test]
    fn failed_row_does_not_claim_email() {
        let result = plan(
            ",Lee,avery@school.test,teaching,,\n\
             Avery,Lee,avery@school.test,teaching,,\n",
            &[],
        );
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.created, 1);
    }

    #[test]
    fn rows_lost_to_concurrent_insert_become_skips() {
        let mut result = plan(
            "Avery,Lee,avery@school.test,teaching,,\n\
             Jules,Moreno,jules@school.test,teaching,,\n\
             ,Patel,kiara@school.test,teaching,,\n",
            &[],
        );
        result.summary.mark_already_present(&["jules@school.test".to_string()]);

        let summary = &result.summary;
        assert_eq!((summary.created, summary.skipped, summary.failed), (1, 1, 1));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.rows[1].status, RowStatus::Skipped);
        assert_eq!(
            summary.rows[1].reason.as_deref(),
            Some("personnel with this email already exists")
        );
        let created_rows = summary
            .rows
            .iter()
            .filter(|row| row.status == RowStatus::Created)
            .count();
        assert_eq!(created_rows, summary.created);
    }

    #[test]
    fn single_entry_is_trimmed_and_checked() {
        let person = validate_personnel(PersonnelRow {
            first_name: "  Rae ".to_string(),
            last_name: " Cruz".to_string(),
            email: " Rae.Cruz@School.test ".to_string(),
            personnel_type: Some("non-teaching".to_string()),
            department: Some(" Library ".to_string()),
            position: Some("   ".to_string()),
        })
        .expect("valid personnel");
        assert_eq!(person.first_name, "Rae");
        assert_eq!(person.last_name, "Cruz");
        assert_eq!(person.email, "rae.cruz@school.test");
        assert_eq!(person.department.as_deref(), Some("Library"));
        assert_eq!(person.position, None);

        let blank = validate_personnel(PersonnelRow {
            first_name: " ".to_string(),
            last_name: "Cruz".to_string(),
            email: "rae@school.test".to_string(),
            ..PersonnelRow::default()
        });
        assert_eq!(blank.unwrap_err(), "missing required field(s): first_name");

        let bad_email = validate_personnel(PersonnelRow {
            first_name: "Rae".to_string(),
            last_name: "Cruz".to_string(),
            email: "not-an-email".to_string(),
            ..PersonnelRow::default()
        });
        assert!(bad_email.unwrap_err().contains("invalid email"));
    }

    #[test]
    fn header_only_file_is_empty_summary() {
        let result = plan("", &[]);
        assert_eq!(result.summary.total, 0);
        assert!(result.to_create.is_empty());
    }

    #[test]
    fn template_then_export_files_share_header() {
        let dir = tempfile::tempdir().expect("temp dir");
        let template_path = dir.path().join("template.csv");
        write_template(std::fs::File::create(&template_path).expect("create")).expect("template");
        let template = std::fs::read_to_string(&template_path).expect("read");
        assert_eq!(template, HEADER_LINE);

        let export_path = dir.path().join("export.csv");
        let people = vec![Personnel {
            id: Uuid::new_v4(),
            first_name: "Avery".to_string(),
            last_name: "Lee".to_string(),
            email: "avery@school.test".to_string(),
            personnel_type: Audience::NonTeaching,
            department: Some("Registrar".to_string()),
            position: None,
            created_at: Utc::now(),
        }];
        write_personnel(std::fs::File::create(&export_path).expect("create"), &people)
            .expect("export");

        let exported = std::fs::read_to_string(&export_path).expect("read");
        assert!(exported.starts_with(HEADER_LINE));
        assert!(exported.contains("Avery,Lee,avery@school.test,non-teaching,Registrar,"));

        let reimport = plan_upload(
            std::fs::File::open(&export_path).expect("open"),
            &HashSet::from(["avery@school.test".to_string()]),
        )
        .expect("plan");
        assert_eq!(reimport.summary.skipped, 1);
    }
}
