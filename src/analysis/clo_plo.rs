//! Course-outcome to programme-outcome alignment check

use super::{AnalysisError, AnalysisOutput, RULE_ENGINE};
use crate::protocol::CloPloPayload;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const DEFAULT_MIN_CLOS_PER_PLO: usize = 2;

#[derive(Debug, Serialize)]
struct AlignmentReport {
    syllabus_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    curriculum_id: Option<String>,
    overall_status: &'static str,
    compliance_score: f64,
    min_clos_per_plo: usize,
    issues: Vec<AlignmentIssue>,
    suggestions: Vec<Suggestion>,
    compliant_mappings: Vec<CompliantMapping>,
}

#[derive(Debug, Serialize)]
struct AlignmentIssue {
    severity: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    code: String,
    current_count: usize,
    required_count: usize,
    affected_clos: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Suggestion {
    priority: usize,
    action: &'static str,
    plo_code: String,
    missing_count: usize,
}

#[derive(Debug, Serialize)]
struct CompliantMapping {
    plo_code: String,
    mapped_clos: Vec<String>,
    total_weight: f64,
    status: &'static str,
}

#[derive(Default)]
struct PloCoverage {
    clos: BTreeSet<String>,
    total_weight: f64,
}

pub fn analyze(payload: &CloPloPayload) -> Result<AnalysisOutput, AnalysisError> {
    let required = payload
        .min_clos_per_plo
        .unwrap_or(DEFAULT_MIN_CLOS_PER_PLO);

    let mut coverage: BTreeMap<String, PloCoverage> = BTreeMap::new();
    for mapping in &payload.mappings {
        let clo = mapping.clo.trim();
        let plo = mapping.plo.trim();
        if clo.is_empty() || plo.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "every mapping needs both a clo and a plo code".to_string(),
            ));
        }

        let entry = coverage.entry(plo.to_string()).or_default();
        if entry.clos.insert(clo.to_string()) {
            entry.total_weight += mapping.weight.unwrap_or(0.0);
        }
    }

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    let mut compliant_mappings = Vec::new();

    for (plo, cov) in &coverage {
        let count = cov.clos.len();
        if count >= required {
            compliant_mappings.push(CompliantMapping {
                plo_code: plo.clone(),
                mapped_clos: cov.clos.iter().cloned().collect(),
                total_weight: cov.total_weight,
                status: "GOOD",
            });
            continue;
        }

        issues.push(AlignmentIssue {
            severity: if count <= 1 { "HIGH" } else { "MEDIUM" },
            kind: "MISSING_PLO_MAPPING",
            code: plo.clone(),
            current_count: count,
            required_count: required,
            affected_clos: cov.clos.iter().cloned().collect(),
        });
        suggestions.push(Suggestion {
            priority: suggestions.len() + 1,
            action: "ADD_CLO",
            plo_code: plo.clone(),
            missing_count: required - count,
        });
    }

    let compliance_score = if coverage.is_empty() {
        0.0
    } else {
        round_one_decimal(compliant_mappings.len() as f64 / coverage.len() as f64 * 100.0)
    };

    let overall_status = if coverage.is_empty() {
        "NO_MAPPINGS"
    } else if issues.is_empty() {
        "COMPLIANT"
    } else {
        "NEEDS_IMPROVEMENT"
    };

    let report = AlignmentReport {
        syllabus_id: payload.syllabus_id.clone(),
        curriculum_id: payload.curriculum_id.clone(),
        overall_status,
        compliance_score,
        min_clos_per_plo: required,
        issues,
        suggestions,
        compliant_mappings,
    };

    Ok(AnalysisOutput {
        result: serde_json::to_value(&report)?,
        attribution: RULE_ENGINE.to_string(),
        confidence: Some(compliance_score / 100.0),
    })
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CloPloMapping;

    fn mapping(clo: &str, plo: &str, weight: f64) -> CloPloMapping {
        CloPloMapping {
            clo: clo.to_string(),
            plo: plo.to_string(),
            weight: Some(weight),
        }
    }

    fn payload(mappings: Vec<CloPloMapping>) -> CloPloPayload {
        CloPloPayload {
            syllabus_id: "syl-1".to_string(),
            curriculum_id: Some("cur-1".to_string()),
            mappings,
            min_clos_per_plo: None,
        }
    }

    #[test]
    fn test_mixed_coverage() {
        let output = analyze(&payload(vec![
            mapping("CLO-1", "PLO1", 15.0),
            mapping("CLO-2", "PLO1", 15.0),
            mapping("CLO-3", "PLO1", 15.0),
            mapping("CLO-1", "PLO2", 10.0),
            mapping("CLO-4", "PLO3", 20.0),
            mapping("CLO-5", "PLO3", 15.0),
        ]))
        .unwrap();

        let result = &output.result;
        assert_eq!(result["overall_status"], "NEEDS_IMPROVEMENT");
        assert_eq!(result["compliance_score"], 66.7);
        assert_eq!(result["issues"].as_array().unwrap().len(), 1);
        assert_eq!(result["issues"][0]["code"], "PLO2");
        assert_eq!(result["issues"][0]["severity"], "HIGH");
        assert_eq!(result["issues"][0]["required_count"], 2);
        assert_eq!(result["suggestions"][0]["action"], "ADD_CLO");
        assert_eq!(result["compliant_mappings"][0]["plo_code"], "PLO1");
        assert_eq!(result["compliant_mappings"][0]["total_weight"], 45.0);
        assert_eq!(output.attribution, "rule-engine");
        assert_eq!(output.confidence, Some(0.667));
    }

    #[test]
    fn test_duplicate_clo_counts_once() {
        let output = analyze(&payload(vec![
            mapping("CLO-1", "PLO1", 10.0),
            mapping("CLO-1", "PLO1", 10.0),
        ]))
        .unwrap();
        assert_eq!(output.result["overall_status"], "NEEDS_IMPROVEMENT");
        assert_eq!(output.result["issues"][0]["current_count"], 1);
    }

    #[test]
    fn test_medium_severity_when_partially_covered() {
        let mut p = payload(vec![
            mapping("CLO-1", "PLO4", 10.0),
            mapping("CLO-2", "PLO4", 10.0),
        ]);
        p.min_clos_per_plo = Some(3);

        let output = analyze(&p).unwrap();
        assert_eq!(output.result["issues"][0]["severity"], "MEDIUM");
        assert_eq!(output.result["suggestions"][0]["missing_count"], 1);
    }

    #[test]
    fn test_fully_compliant() {
        let output = analyze(&payload(vec![
            mapping("CLO-1", "PLO1", 10.0),
            mapping("CLO-2", "PLO1", 10.0),
        ]))
        .unwrap();
        assert_eq!(output.result["overall_status"], "COMPLIANT");
        assert_eq!(output.result["compliance_score"], 100.0);
        assert_eq!(output.confidence, Some(1.0));
    }

    #[test]
    fn test_no_mappings() {
        let output = analyze(&payload(vec![])).unwrap();
        assert_eq!(output.result["overall_status"], "NO_MAPPINGS");
        assert_eq!(output.result["compliance_score"], 0.0);
    }

    #[test]
    fn test_blank_codes_are_invalid_input() {
        let result = analyze(&payload(vec![mapping(" ", "PLO1", 1.0)]));
        assert!(matches!(result, Err(AnalysisError::InvalidInput(_))));
    }
}
