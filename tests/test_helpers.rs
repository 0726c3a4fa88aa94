//! Test helpers and fixtures for integration tests

use serde_json::{json, Value};

/// Serialized task message in the canonical wire shape
#[allow(dead_code)]
pub fn task_bytes(id: &str, action: &str, payload: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "action": action,
        "priority": "MEDIUM",
        "submittedBy": "integration-test",
        "payload": payload,
    }))
    .unwrap()
}

/// Two PLOs: PLO1 covered by two CLOs, PLO2 by one
#[allow(dead_code)]
pub fn clo_plo_payload() -> Value {
    json!({
        "syllabus_id": "syllabus-it-001",
        "curriculum_id": "curriculum-it",
        "mappings": [
            {"clo": "CLO1", "plo": "PLO1", "weight": 30},
            {"clo": "CLO2", "plo": "PLO1", "weight": 20},
            {"clo": "CLO3", "plo": "PLO2", "weight": 50}
        ]
    })
}

#[allow(dead_code)]
pub fn version_diff_payload() -> Value {
    json!({
        "old_version_id": "v1",
        "new_version_id": "v2",
        "old_content": {
            "description": "Old description",
            "learning_outcomes": ["Design an ERD"]
        },
        "new_content": {
            "description": "New description",
            "learning_outcomes": ["Design an ERD", "Normalize a schema"]
        }
    })
}

#[allow(dead_code)]
pub fn summarize_payload(description: &str) -> Value {
    json!({
        "syllabus_id": "syllabus-it-002",
        "syllabus_data": {
            "course_name": "Thiết kế và tối ưu hóa CSDL",
            "description": description,
            "theory_hours": 30,
            "practice_hours": 15,
            "learning_outcomes": [{"description": "Thiết kế ERD"}],
            "assessment_scheme": [
                {"type": "Giữa kỳ", "weight": 40},
                {"type": "Cuối kỳ", "weight": 60}
            ],
            "prerequisites": ["Lập trình hướng đối tượng"]
        }
    })
}

/// Vietnamese course description well over the default summary length
#[allow(dead_code)]
pub const LONG_DESCRIPTION: &str = "Môn học trang bị cho sinh viên kiến thức nền tảng về thiết kế \
    cơ sở dữ liệu quan hệ. Sinh viên học cách chuẩn hóa lược đồ và xây dựng chỉ mục. \
    Phần thực hành tập trung vào tối ưu hóa truy vấn trên dữ liệu lớn. \
    Cuối kỳ sinh viên thực hiện đồ án nhóm và trình bày kết quả.";
