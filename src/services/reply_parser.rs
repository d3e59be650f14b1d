//! LLM 回复解析
//!
//! 严格按结构校验，返回 `Result<T, ReplyParseError>`；错误信息会原样附加到重试提示词中。

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::models::{ChecklistItemDraft, FlowDraft, ItemType, LocalId, ReviewVerdict, Verdict};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplyParseError {
    #[error("output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("top-level value must be a JSON array, got {0}")]
    NotAnArray(&'static str),

    #[error("top-level value must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("item at index {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },

    #[error("local id {0} is used by more than one item")]
    DuplicateLocalId(LocalId),

    #[error("item {0} lists itself as its parent")]
    SelfParent(LocalId),

    #[error("item {local_id} references unknown id {target} in {field}")]
    UnknownReference {
        local_id: LocalId,
        field: &'static str,
        target: LocalId,
    },

    #[error("verdict is invalid: {0}")]
    InvalidVerdict(String),
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").ok())
        .as_ref()
}

fn object_regex() -> Option<&'static Regex> {
    static OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
    OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok()).as_ref()
}

/// 去掉包裹整段回复的 markdown 代码块
fn strip_code_fence(text: &str) -> &str {
    match fence_regex().and_then(|re| re.captures(text)).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Deserialize)]
struct RawDraft {
    id: Option<LocalId>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parent_id: Option<LocalId>,
    #[serde(default)]
    item_type: Option<ItemType>,
    #[serde(default)]
    is_conclusion: Option<bool>,
    #[serde(default)]
    flow_data: Option<FlowDraft>,
}

/// 解析单页清单抽取结果
///
/// - 顶层必须是数组，对象不会被强制转换
/// - 缺少 `id` 时使用数组下标作为局部 ID
/// - 所有父项目 / 分支引用必须指向本页存在的局部 ID（允许向后引用）
pub fn parse_checklist_drafts(text: &str) -> Result<Vec<ChecklistItemDraft>, ReplyParseError> {
    let body = strip_code_fence(text);
    let value: JsonValue = serde_json::from_str(body).map_err(|e| ReplyParseError::InvalidJson(e.to_string()))?;

    let elements = match value {
        JsonValue::Array(elements) => elements,
        other => return Err(ReplyParseError::NotAnArray(json_type_name(&other))),
    };

    let mut drafts = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        if !element.is_object() {
            return Err(ReplyParseError::InvalidItem {
                index,
                reason: format!("expected object, got {}", json_type_name(&element)),
            });
        }
        let raw: RawDraft = serde_json::from_value(element).map_err(|e| ReplyParseError::InvalidItem {
            index,
            reason: e.to_string(),
        })?;
        drafts.push(ChecklistItemDraft {
            local_id: raw.id.unwrap_or(index as LocalId),
            name: raw.name,
            description: raw.description.unwrap_or_default(),
            parent_local_id: raw.parent_id,
            item_type: raw.item_type.unwrap_or_default(),
            is_conclusion: raw.is_conclusion.unwrap_or(false),
            flow_data: raw.flow_data,
        });
    }

    validate_references(&drafts)?;
    Ok(drafts)
}

fn validate_references(drafts: &[ChecklistItemDraft]) -> Result<(), ReplyParseError> {
    let mut known = HashSet::new();
    for draft in drafts {
        if !known.insert(draft.local_id) {
            return Err(ReplyParseError::DuplicateLocalId(draft.local_id));
        }
    }

    for draft in drafts {
        if let Some(parent) = draft.parent_local_id {
            if parent == draft.local_id {
                return Err(ReplyParseError::SelfParent(draft.local_id));
            }
            if !known.contains(&parent) {
                return Err(ReplyParseError::UnknownReference {
                    local_id: draft.local_id,
                    field: "parent_id",
                    target: parent,
                });
            }
        }
        if let Some(flow) = &draft.flow_data {
            if let Some(target) = flow.targets().into_iter().find(|t| !known.contains(*t)) {
                return Err(ReplyParseError::UnknownReference {
                    local_id: draft.local_id,
                    field: "flow_data",
                    target: *target,
                });
            }
        }
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    result: String,
    confidence: f64,
    explanation: String,
    #[serde(default, alias = "short_explanation")]
    short_explanation: Option<String>,
    #[serde(default, alias = "extracted_text")]
    extracted_text: Option<String>,
    #[serde(default, alias = "page_number")]
    page_number: Option<u32>,
}

/// 解析单个项目的审查判定
///
/// 回复中夹杂说明文字时，取第一个 `{` 到最后一个 `}` 之间的内容。
pub fn parse_verdict(text: &str) -> Result<ReviewVerdict, ReplyParseError> {
    let body = strip_code_fence(text);
    let value: JsonValue = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(first_error) => {
            let candidate = object_regex()
                .and_then(|re| re.find(body))
                .ok_or_else(|| ReplyParseError::InvalidJson(first_error.to_string()))?;
            serde_json::from_str(candidate.as_str()).map_err(|e| ReplyParseError::InvalidJson(e.to_string()))?
        }
    };

    if !value.is_object() {
        return Err(ReplyParseError::NotAnObject(json_type_name(&value)));
    }

    let raw: RawVerdict = serde_json::from_value(value).map_err(|e| ReplyParseError::InvalidVerdict(e.to_string()))?;

    let result = match raw.result.trim().to_ascii_lowercase().as_str() {
        "pass" => Verdict::Pass,
        "fail" => Verdict::Fail,
        other => {
            return Err(ReplyParseError::InvalidVerdict(format!(
                "result must be \"pass\" or \"fail\", got {:?}",
                other
            )))
        }
    };
    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ReplyParseError::InvalidVerdict(format!(
            "confidence must be between 0 and 1, got {}",
            raw.confidence
        )));
    }

    Ok(ReviewVerdict {
        result,
        confidence: raw.confidence,
        explanation: raw.explanation,
        short_explanation: raw.short_explanation,
        extracted_text: raw.extracted_text,
        page_number: raw.page_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlowData;

    #[test]
    fn test_parse_array_with_defaults() {
        let drafts = parse_checklist_drafts(
            r#"[
                {"name": "Root", "description": "d", "parent_id": null},
                {"name": "Child", "parent_id": 0, "item_type": "simple"}
            ]"#,
        )
        .unwrap();

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].local_id, 0);
        assert_eq!(drafts[1].local_id, 1);
        assert_eq!(drafts[1].parent_local_id, Some(0));
        assert_eq!(drafts[1].item_type, ItemType::Simple);
        assert!(!drafts[1].is_conclusion);
        assert_eq!(drafts[1].description, "");
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let drafts = parse_checklist_drafts("```json\n[{\"name\": \"A\"}]\n```").unwrap();
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn test_top_level_object_is_rejected() {
        let err = parse_checklist_drafts(r#"{"items": [{"name": "A"}]}"#).unwrap_err();
        assert_eq!(err, ReplyParseError::NotAnArray("object"));
    }

    #[test]
    fn test_forward_reference_is_allowed() {
        let drafts = parse_checklist_drafts(
            r#"[
                {"id": 0, "name": "Child", "parent_id": 1},
                {"id": 1, "name": "Parent"}
            ]"#,
        )
        .unwrap();
        assert_eq!(drafts[0].parent_local_id, Some(1));
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let err = parse_checklist_drafts(r#"[{"id": 0, "name": "A", "parent_id": 7}]"#).unwrap_err();
        assert_eq!(
            err,
            ReplyParseError::UnknownReference {
                local_id: 0,
                field: "parent_id",
                target: 7
            }
        );
    }

    #[test]
    fn test_unknown_flow_target_is_rejected() {
        let err = parse_checklist_drafts(
            r#"[
                {"id": 0, "name": "Q", "item_type": "FLOW",
                 "flow_data": {"condition_type": "YES_NO", "next_if_yes": 1, "next_if_no": 9}},
                {"id": 1, "name": "Yes"}
            ]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ReplyParseError::UnknownReference { target: 9, .. }));
    }

    #[test]
    fn test_multi_choice_flow_is_parsed() {
        let drafts = parse_checklist_drafts(
            r#"[
                {"id": 0, "name": "Q", "item_type": "FLOW",
                 "flow_data": {"condition_type": "MULTI_CHOICE", "next_options": {"a": 1, "b": 2}}},
                {"id": 1, "name": "A", "is_conclusion": true},
                {"id": 2, "name": "B", "is_conclusion": true}
            ]"#,
        )
        .unwrap();
        match &drafts[0].flow_data {
            Some(FlowData::MultiChoice { next_options }) => {
                assert_eq!(next_options.get("a"), Some(&1));
                assert_eq!(next_options.get("b"), Some(&2));
            }
            other => panic!("unexpected flow data: {:?}", other),
        }
        assert!(drafts[1].is_conclusion);
    }

    #[test]
    fn test_duplicate_and_self_parent_are_rejected() {
        assert_eq!(
            parse_checklist_drafts(r#"[{"id": 1, "name": "A"}, {"id": 1, "name": "B"}]"#).unwrap_err(),
            ReplyParseError::DuplicateLocalId(1)
        );
        assert_eq!(
            parse_checklist_drafts(r#"[{"id": 3, "name": "A", "parent_id": 3}]"#).unwrap_err(),
            ReplyParseError::SelfParent(3)
        );
    }

    #[test]
    fn test_item_without_name_is_rejected() {
        let err = parse_checklist_drafts(r#"[{"description": "no name"}]"#).unwrap_err();
        assert!(matches!(err, ReplyParseError::InvalidItem { index: 0, .. }));
    }

    #[test]
    fn test_parse_verdict_with_surrounding_text() {
        let verdict = parse_verdict(
            "Here is my judgement:\n{\"result\": \"PASS\", \"confidence\": 0.92, \"explanation\": \"ok\", \"shortExplanation\": \"fine\"}",
        )
        .unwrap();
        assert_eq!(verdict.result, Verdict::Pass);
        assert_eq!(verdict.confidence, 0.92);
        assert_eq!(verdict.short_explanation.as_deref(), Some("fine"));
    }

    #[test]
    fn test_parse_verdict_rejects_bad_fields() {
        assert!(matches!(
            parse_verdict(r#"{"result": "maybe", "confidence": 0.5, "explanation": "x"}"#),
            Err(ReplyParseError::InvalidVerdict(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"result": "fail", "confidence": 1.5, "explanation": "x"}"#),
            Err(ReplyParseError::InvalidVerdict(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"result": "fail", "confidence": 0.5}"#),
            Err(ReplyParseError::InvalidVerdict(_))
        ));
        assert!(matches!(parse_verdict("no json here"), Err(ReplyParseError::InvalidJson(_))));
        assert_eq!(parse_verdict("[1, 2]").unwrap_err(), ReplyParseError::NotAnObject("array"));
    }
}
