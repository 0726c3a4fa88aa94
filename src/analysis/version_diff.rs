//! Section-level diff between two syllabus versions

use super::{AnalysisError, AnalysisOutput, RULE_ENGINE};
use crate::protocol::VersionDiffPayload;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Sections whose change alters what a student is committed to
const MAJOR_SECTIONS: [&str; 5] = [
    "learning_outcomes",
    "assessment_scheme",
    "prerequisites",
    "clos",
    "assessmentMethods",
];

/// Snapshot fields that change on every save and say nothing about content
const SNAPSHOT_METADATA: [&str; 5] = [
    "version_no",
    "version_number",
    "status",
    "created_at",
    "updated_at",
];

const SNAPSHOT_CONTENT: &str = "content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ChangeType {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Significance {
    Major,
    Minor,
}

#[derive(Debug, Serialize)]
struct SectionChange {
    section: String,
    change_type: ChangeType,
    significance: Significance,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_value: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChangesSummary {
    total_changes: usize,
    major_changes: usize,
    minor_changes: usize,
    sections_affected: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DiffReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    old_version_id: Option<String>,
    new_version_id: String,
    is_first_version: bool,
    changes_summary: ChangesSummary,
    detailed_changes: Vec<SectionChange>,
}

pub fn analyze(payload: &VersionDiffPayload) -> Result<AnalysisOutput, AnalysisError> {
    if payload.old_version_id.as_deref() == Some(payload.new_version_id.as_str()) {
        return Err(AnalysisError::InvalidInput(format!(
            "version {} cannot be compared with itself",
            payload.new_version_id
        )));
    }

    let old_sections = comparable_sections(&payload.old_content);
    let new_sections = comparable_sections(&payload.new_content);
    let sections: BTreeSet<&String> = old_sections.keys().chain(new_sections.keys()).collect();

    let mut detailed_changes = Vec::new();
    for section in sections {
        let old = old_sections.get(section);
        let new = new_sections.get(section);
        let change_type = match (old, new) {
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Removed,
            (Some(a), Some(b)) if a != b => ChangeType::Modified,
            _ => continue,
        };

        detailed_changes.push(SectionChange {
            section: section.clone(),
            change_type,
            significance: significance_of(section),
            old_value: old.cloned(),
            new_value: new.cloned(),
        });
    }

    let major_changes = detailed_changes
        .iter()
        .filter(|c| c.significance == Significance::Major)
        .count();

    let report = DiffReport {
        old_version_id: payload.old_version_id.clone(),
        new_version_id: payload.new_version_id.clone(),
        is_first_version: payload.old_version_id.is_none(),
        changes_summary: ChangesSummary {
            total_changes: detailed_changes.len(),
            major_changes,
            minor_changes: detailed_changes.len() - major_changes,
            sections_affected: detailed_changes.iter().map(|c| c.section.clone()).collect(),
        },
        detailed_changes,
    };

    Ok(AnalysisOutput {
        result: serde_json::to_value(&report)?,
        attribution: RULE_ENGINE.to_string(),
        confidence: None,
    })
}

/// Sections of one side of the comparison
///
/// A plain content map is compared as it is. A version snapshot loses its
/// bookkeeping fields and has its nested `content` object lifted to the top
/// level, where a non-null snapshot field wins over a nested one of the same
/// name.
fn comparable_sections(side: &Map<String, Value>) -> Map<String, Value> {
    let nested = match side.get(SNAPSHOT_CONTENT) {
        Some(Value::Object(nested)) => Some(nested),
        _ if side.contains_key("version_no") => None,
        _ => return side.clone(),
    };

    let mut sections: Map<String, Value> = side
        .iter()
        .filter(|(key, _)| {
            key.as_str() != SNAPSHOT_CONTENT && !SNAPSHOT_METADATA.contains(&key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (key, value) in nested.into_iter().flatten() {
        let shadowed = sections.get(key).is_some_and(|existing| !existing.is_null());
        if !shadowed {
            sections.insert(key.clone(), value.clone());
        }
    }
    sections
}

fn significance_of(section: &str) -> Significance {
    if MAJOR_SECTIONS.contains(&section) {
        Significance::Major
    } else {
        Significance::Minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_added_removed_modified() {
        let payload = VersionDiffPayload {
            old_version_id: Some("v1".to_string()),
            new_version_id: "v2".to_string(),
            old_content: object(json!({
                "course_name": "Databases",
                "prerequisites": ["Programming 1"],
                "notes": "old",
                "credits": 3
            })),
            new_content: object(json!({
                "course_name": "Databases",
                "prerequisites": ["Programming 1", "Discrete Maths"],
                "credits": 4,
                "learning_outcomes": [{"description": "Normalize schemas"}]
            })),
        };

        let output = analyze(&payload).unwrap();
        let result = &output.result;
        assert_eq!(result["is_first_version"], false);
        assert_eq!(result["changes_summary"]["total_changes"], 4);
        assert_eq!(result["changes_summary"]["major_changes"], 2);
        assert_eq!(result["changes_summary"]["minor_changes"], 2);

        let changes = result["detailed_changes"].as_array().unwrap();
        let find = |section: &str| {
            changes
                .iter()
                .find(|c| c["section"] == section)
                .unwrap()
                .clone()
        };
        assert_eq!(find("credits")["change_type"], "MODIFIED");
        assert_eq!(find("credits")["significance"], "MINOR");
        assert_eq!(find("notes")["change_type"], "REMOVED");
        assert!(find("notes").get("new_value").is_none());
        assert_eq!(find("learning_outcomes")["change_type"], "ADDED");
        assert_eq!(find("learning_outcomes")["significance"], "MAJOR");
        assert_eq!(find("prerequisites")["change_type"], "MODIFIED");
        assert!(changes.iter().all(|c| c["section"] != "course_name"));
        assert_eq!(output.confidence, None);
    }

    #[test]
    fn test_first_version_lists_everything_as_added() {
        let payload = VersionDiffPayload {
            old_version_id: None,
            new_version_id: "v1".to_string(),
            old_content: Map::new(),
            new_content: object(json!({"course_name": "Networks", "assessment_scheme": []})),
        };

        let result = analyze(&payload).unwrap().result;
        assert_eq!(result["is_first_version"], true);
        assert!(result.get("old_version_id").is_none());
        assert_eq!(result["changes_summary"]["total_changes"], 2);
        assert_eq!(
            result["changes_summary"]["sections_affected"],
            json!(["assessment_scheme", "course_name"])
        );
    }

    #[test]
    fn test_identical_content_has_no_changes() {
        let content = object(json!({"course_name": "Networks"}));
        let payload = VersionDiffPayload {
            old_version_id: Some("v1".to_string()),
            new_version_id: "v2".to_string(),
            old_content: content.clone(),
            new_content: content,
        };
        let result = analyze(&payload).unwrap().result;
        assert_eq!(result["changes_summary"]["total_changes"], 0);
    }

    #[test]
    fn test_version_snapshots_compare_content_not_bookkeeping() {
        let payload = VersionDiffPayload {
            old_version_id: Some("v1".to_string()),
            new_version_id: "v2".to_string(),
            old_content: object(json!({
                "version_no": 1,
                "status": "DRAFT",
                "subject_code": "CS301",
                "description": "Cơ sở dữ liệu quan hệ",
                "content": {
                    "clos": [{"code": "CLO1"}],
                    "prerequisites": "OOP",
                    "description": "ignored, shadowed"
                },
                "updated_at": "2025-01-01T00:00:00Z"
            })),
            new_content: object(json!({
                "version_no": 2,
                "status": "PUBLISHED",
                "subject_code": "CS301",
                "description": "Cơ sở dữ liệu quan hệ",
                "content": {
                    "clos": [{"code": "CLO1"}, {"code": "CLO2"}],
                    "prerequisites": "OOP",
                    "teachingMethods": "Flipped classroom"
                },
                "updated_at": "2025-03-01T00:00:00Z"
            })),
        };

        let result = analyze(&payload).unwrap().result;
        assert_eq!(
            result["changes_summary"]["sections_affected"],
            json!(["clos", "teachingMethods"])
        );
        assert_eq!(result["changes_summary"]["major_changes"], 1);
        assert_eq!(result["detailed_changes"][0]["change_type"], "MODIFIED");
        assert_eq!(result["detailed_changes"][1]["change_type"], "ADDED");
    }

    #[test]
    fn test_snapshot_without_content_still_drops_bookkeeping() {
        let payload = VersionDiffPayload {
            old_version_id: Some("v1".to_string()),
            new_version_id: "v2".to_string(),
            old_content: object(json!({"version_no": 1, "objectives": "A", "content": null})),
            new_content: object(json!({"version_no": 2, "objectives": "A", "content": null})),
        };
        let result = analyze(&payload).unwrap().result;
        assert_eq!(result["changes_summary"]["total_changes"], 0);
    }

    #[test]
    fn test_same_version_is_invalid() {
        let payload = VersionDiffPayload {
            old_version_id: Some("v1".to_string()),
            new_version_id: "v1".to_string(),
            old_content: Map::new(),
            new_content: Map::new(),
        };
        assert!(matches!(
            analyze(&payload),
            Err(AnalysisError::InvalidInput(_))
        ));
    }
}
