use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::models::{
    EvaluationForm, EvaluationReport, EvaluationResponse, GrandTotal, ReportItem, SectionSummary,
};

/// Scale maximum used for every percentage in the report, whatever the
/// form's own scale says.
pub const REPORT_SCALE_MAX: f64 = 5.0;

pub fn percentage_of_scale(average_score: f64) -> f64 {
    average_score / REPORT_SCALE_MAX * 100.0
}

/// Pivots answers into (section, item) buckets and averages them.
///
/// Buckets follow the form's section and item order. Pairs the form does
/// not define keep the order in which they first appear in `responses`.
pub fn summarize_items(
    form: Option<&EvaluationForm>,
    responses: &[EvaluationResponse],
) -> Vec<ReportItem> {
    let mut form_rank: HashMap<(&str, &str), usize> = HashMap::new();
    if let Some(form) = form {
        for section in &form.sections {
            for item in &section.items {
                let next = form_rank.len();
                form_rank
                    .entry((section.title.as_str(), item.as_str()))
                    .or_insert(next);
            }
        }
    }

    let mut seen: Vec<(&str, &str)> = Vec::new();
    let mut buckets: HashMap<(&str, &str), (i64, usize)> = HashMap::new();

    for response in responses {
        for answer in &response.answers {
            let key = (answer.section.as_str(), answer.item.as_str());
            let entry = buckets.entry(key).or_insert_with(|| {
                seen.push(key);
                (0, 0)
            });
            entry.0 += i64::from(answer.score);
            entry.1 += 1;
        }
    }

    let mut ordered: Vec<(usize, usize, (&str, &str))> = seen
        .into_iter()
        .enumerate()
        .map(|(appearance, key)| match form_rank.get(&key) {
            Some(rank) => (0, *rank, key),
            None => (1, appearance, key),
        })
        .collect();
    ordered.sort_by_key(|(tier, rank, _)| (*tier, *rank));

    ordered
        .into_iter()
        .map(|(_, _, key)| {
            let (total, count) = buckets[&key];
            let average_score = if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            };
            ReportItem {
                section: key.0.to_string(),
                item: key.1.to_string(),
                average_score,
                percentage: percentage_of_scale(average_score),
                respondent_count: count,
            }
        })
        .collect()
}

/// Groups items by section. Subtotals are plain sums of the member
/// averages and percentages, not means.
pub fn roll_up_sections(items: &[ReportItem]) -> (Vec<SectionSummary>, GrandTotal) {
    let mut sections: Vec<SectionSummary> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for item in items {
        let position = *index.entry(item.section.as_str()).or_insert_with(|| {
            sections.push(SectionSummary {
                section: item.section.clone(),
                items: Vec::new(),
                sum_average: 0.0,
                sum_percentage: 0.0,
            });
            sections.len() - 1
        });
        let summary = &mut sections[position];
        summary.sum_average += item.average_score;
        summary.sum_percentage += item.percentage;
        summary.items.push(item.clone());
    }

    let grand_total = sections.iter().fold(GrandTotal::default(), |acc, s| GrandTotal {
        sum_average: acc.sum_average + s.sum_average,
        sum_percentage: acc.sum_percentage + s.sum_percentage,
    });

    (sections, grand_total)
}

/// Builds the report over responses already narrowed to the form and
/// semester. An empty slice yields the zero report.
pub fn build_report(
    form_id: Uuid,
    form: Option<&EvaluationForm>,
    semester: Option<&str>,
    responses: &[EvaluationResponse],
) -> EvaluationReport {
    let items = summarize_items(form, responses);
    let (sections, grand_total) = roll_up_sections(&items);

    EvaluationReport {
        form_id,
        form_name: form.map(|f| f.name.clone()),
        semester: semester.map(str::to_string),
        total_responses: responses.len(),
        items,
        sections,
        grand_total,
    }
}

pub fn render_markdown(report: &EvaluationReport) -> String {
    let mut output = String::new();
    let title = report.form_name.as_deref().unwrap_or("Evaluation");
    let semester_label = report.semester.as_deref().unwrap_or("all semesters");

    let _ = writeln!(output, "# {} Report", title);
    let _ = writeln!(
        output,
        "Form {} ({}), {} responses",
        report.form_id, semester_label, report.total_responses
    );
    let _ = writeln!(output);

    if report.total_responses == 0 || report.items.is_empty() {
        let _ = writeln!(output, "No responses found.");
        return output;
    }

    let _ = writeln!(output, "| Item | Respondents | Average | Percentage |");
    let _ = writeln!(output, "|---|---:|---:|---:|");

    for section in &report.sections {
        let _ = writeln!(output, "| **{}** | | | |", section.section);
        for item in &section.items {
            let _ = writeln!(
                output,
                "| {} | {} | {:.3} | {:.1}% |",
                item.item, item.respondent_count, item.average_score, item.percentage
            );
        }
        let _ = writeln!(
            output,
            "| _Subtotal_ | | {:.3} | {:.1}% |",
            section.sum_average, section.sum_percentage
        );
    }

    let _ = writeln!(
        output,
        "| **Grand total** | | {:.3} | {:.1}% |",
        report.grand_total.sum_average, report.grand_total.sum_percentage
    );

    output
}
