//! Syllabus summary
//!
//! Only the course description goes through the condensation chain. The
//! remaining highlights are read straight from the structured payload.

use super::{AnalysisError, AnalysisOutput};
use crate::llm::ProviderFallbackChain;
use crate::protocol::{SummarizePayload, SyllabusData};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Difficulty {
    Introductory,
    Intermediate,
    Advanced,
}

#[derive(Debug, Serialize)]
struct SummaryReport<'a> {
    syllabus_id: &'a str,
    overview: Overview<'a>,
    highlights: Highlights<'a>,
    prerequisites: Prerequisites<'a>,
    generated_by: String,
}

#[derive(Debug, Serialize)]
struct Overview<'a> {
    title: &'a str,
    description: String,
}

#[derive(Debug, Serialize)]
struct Highlights<'a> {
    difficulty: Difficulty,
    duration: Duration,
    assessment: Assessment<'a>,
    skills_acquired: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Duration {
    theory_hours: u32,
    practice_hours: u32,
    total_hours: u32,
}

#[derive(Debug, Serialize)]
struct Assessment<'a> {
    breakdown: Vec<AssessmentShare<'a>>,
    total_weight: f64,
}

#[derive(Debug, Serialize)]
struct AssessmentShare<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    weight: f64,
}

#[derive(Debug, Serialize)]
struct Prerequisites<'a> {
    required: &'a [String],
    count: usize,
}

pub async fn analyze(
    payload: &SummarizePayload,
    chain: &ProviderFallbackChain,
    default_chars: usize,
) -> Result<AnalysisOutput, AnalysisError> {
    let data = &payload.syllabus_data;
    let target = payload.target_length.unwrap_or(default_chars);
    if target == 0 {
        return Err(AnalysisError::InvalidInput(
            "target_length must be at least 1".to_string(),
        ));
    }

    let condensed = chain.condense(&data.description, target).await;
    debug!(
        strategy = %condensed.strategy,
        chars = condensed.text.chars().count(),
        "Description condensed"
    );

    let theory_hours = data.theory_hours.unwrap_or(0);
    let practice_hours = data.practice_hours.unwrap_or(0);
    let total_hours = theory_hours.saturating_add(practice_hours);

    let breakdown: Vec<AssessmentShare<'_>> = data
        .assessment_scheme
        .iter()
        .map(|item| AssessmentShare {
            kind: &item.kind,
            weight: item.weight,
        })
        .collect();
    let total_weight: f64 = breakdown.iter().map(|share| share.weight).sum();

    let report = SummaryReport {
        syllabus_id: &payload.syllabus_id,
        overview: Overview {
            title: &data.course_name,
            description: condensed.text,
        },
        highlights: Highlights {
            difficulty: difficulty_of(data, total_hours),
            duration: Duration {
                theory_hours,
                practice_hours,
                total_hours,
            },
            assessment: Assessment {
                breakdown,
                total_weight,
            },
            skills_acquired: data
                .learning_outcomes
                .iter()
                .map(|outcome| outcome.description.trim())
                .filter(|skill| !skill.is_empty())
                .collect(),
        },
        prerequisites: Prerequisites {
            required: &data.prerequisites,
            count: data.prerequisites.len(),
        },
        generated_by: condensed.strategy.clone(),
    };

    Ok(AnalysisOutput {
        result: serde_json::to_value(&report)?,
        attribution: condensed.strategy,
        confidence: None,
    })
}

/// Prerequisite depth first, contact hours second
fn difficulty_of(data: &SyllabusData, total_hours: u32) -> Difficulty {
    match data.prerequisites.len() {
        0 if total_hours < 45 => Difficulty::Introductory,
        n if n >= 3 || total_hours >= 90 => Difficulty::Advanced,
        _ => Difficulty::Intermediate,
    }
}
