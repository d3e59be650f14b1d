//! 提示词模板
//!
//! 提示词正文使用英文，输出语言由 `Config::output_language` 决定。

use crate::models::ReviewFileType;

/// 单页清单抽取提示词
pub fn checklist_extraction_prompt(language: &str) -> String {
    format!(
        r#"You are an AI assistant that extracts and structures checklists from technical documents, legal documents, tables, and diagrams.

## Overview
Extract every checklist item from the attached page and express the hierarchy between items.

## Output language
YOU MUST WRITE ALL TEXT, INCLUDING EVERY JSON FIELD VALUE, IN {language}.

## Output format
Return only a strict JSON array (enclosed in [ ]). Never return an object and never wrap the array in markdown code fences.

Each element has the following fields:
- id: integer identifier of the item, unique within this page (starting from 0)
- name: name of the check item
- description: detailed explanation of what must be checked
- parent_id: id of the parent item, or null for top-level items
- item_type: "SIMPLE" for ordinary items, "FLOW" for flowchart decision nodes
- is_conclusion: true when the item is a terminal conclusion of a flowchart
- flow_data: only for FLOW items, one of
  {{"condition_type": "YES_NO", "next_if_yes": <id>, "next_if_no": <id>}}
  {{"condition_type": "MULTI_CHOICE", "next_options": {{"<option label>": <id>}}}}

## Rules
1. Identify both simple check items and flowchart items
2. Express the hierarchy through parent_id
3. Extract all items without omissions and merge duplicates
4. Every parent_id and flow_data target must be the id of another item in your output

## Example (the real output must be in {language})
[
  {{"id": 0, "name": "Contract parties", "description": "Whether both parties' official names are stated", "parent_id": null, "item_type": "SIMPLE", "is_conclusion": false}},
  {{"id": 1, "name": "Party addresses", "description": "Whether both parties' registered addresses are stated", "parent_id": 0, "item_type": "SIMPLE", "is_conclusion": false}}
]"#
    )
}

/// 审查单个清单项目的提示词
pub fn review_prompt(language: &str, check_name: &str, check_description: &str, file_type: ReviewFileType) -> String {
    let material = match file_type {
        ReviewFileType::Pdf => "the attached documents",
        ReviewFileType::Image => "the attached images. Inspect every image carefully, including small text and visual details",
    };

    format!(
        r#"You are an AI assistant that reviews documents.
Review {material} against the following check item.

Check item: {check_name}
Description: {check_description}

## Output language
YOU MUST WRITE ALL TEXT, INCLUDING EVERY JSON FIELD VALUE, IN {language}.

Decide whether the material complies with the check item and respond only with the JSON object below.
Do not output anything outside the JSON and do not use markdown code fences.

{{
  "result": "pass" | "fail",
  "confidence": <number between 0 and 1>,
  "explanation": "<detailed reasoning>",
  "shortExplanation": "<summary of at most 80 characters>",
  "extractedText": "<relevant excerpt>",
  "pageNumber": <integer starting from 1>
}}

Confidence guide:
- 0.90 to 1.00: clear evidence
- 0.70 to 0.89: relevant evidence with some uncertainty
- 0.50 to 0.69: ambiguous evidence"#
    )
}

/// 在原提示词后追加上次的解析错误，用于唯一一次重试
pub fn with_parse_error(base_prompt: &str, error: &str, expected_shape: &str) -> String {
    format!(
        "{base_prompt}\n\nThe previous output could not be parsed. Error: {error}\n\nPlease output a strict JSON {expected_shape} only."
    )
}
