use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{EvaluationForm, NewEvaluationForm, NewEvaluationResponse};

pub fn validate_form(form: &NewEvaluationForm) -> Result<()> {
    if form.name.trim().is_empty() {
        return Err(Error::Validation("form name is required".to_string()));
    }
    if form.sections.is_empty() {
        return Err(Error::Validation(format!(
            "form {:?} needs at least one section",
            form.name
        )));
    }

    let mut titles = HashSet::new();
    for section in &form.sections {
        let title = section.title.trim();
        if title.is_empty() {
            return Err(Error::Validation("section title is required".to_string()));
        }
        if !titles.insert(title) {
            return Err(Error::Validation(format!("duplicate section {title:?}")));
        }
        if section.items.is_empty() {
            return Err(Error::Validation(format!("section {title:?} has no items")));
        }
        let mut items = HashSet::new();
        for item in &section.items {
            if item.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "section {title:?} has a blank item"
                )));
            }
            if !items.insert(item.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate item {item:?} in section {title:?}"
                )));
            }
        }
    }

    if form.scale.is_empty() {
        return Err(Error::Validation("rating scale is required".to_string()));
    }
    let mut values = HashSet::new();
    for option in &form.scale {
        if !values.insert(option.value) {
            return Err(Error::Validation(format!(
                "duplicate scale value {}",
                option.value
            )));
        }
    }

    Ok(())
}

/// Checks a submission against the form it answers.
pub fn validate_response(form: &EvaluationForm, response: &NewEvaluationResponse) -> Result<()> {
    if response.form_id != form.id {
        return Err(Error::Validation(format!(
            "response targets form {} but was checked against {}",
            response.form_id, form.id
        )));
    }
    for (field, value) in [
        ("respondent_name", &response.respondent_name),
        ("respondent_email", &response.respondent_email),
        ("semester", &response.semester),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{field} is required")));
        }
    }
    if response.answers.is_empty() {
        return Err(Error::Validation("response has no answers".to_string()));
    }

    let mut answered = HashSet::new();
    for answer in &response.answers {
        if !form.has_item(&answer.section, &answer.item) {
            return Err(Error::Validation(format!(
                "{:?} / {:?} is not on form {:?}",
                answer.section, answer.item, form.name
            )));
        }
        if !form.accepts_score(answer.score) {
            return Err(Error::Validation(format!(
                "score {} for {:?} is not on the rating scale",
                answer.score, answer.item
            )));
        }
        if !answered.insert((answer.section.as_str(), answer.item.as_str())) {
            return Err(Error::Validation(format!(
                "{:?} / {:?} answered more than once",
                answer.section, answer.item
            )));
        }
    }

    Ok(())
}
