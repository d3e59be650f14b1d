//! Blob 存储键
//!
//! 所有键都是 (documentId, pageNumber, stage) 的确定性函数，重跑某个阶段会覆盖而不是新增。

pub fn checklist_page_key(document_id: &str, page_number: u32, extension: &str) -> String {
    format!("checklist/pages/{}/page_{}.{}", document_id, page_number, extension)
}

/// 单页抽取草稿
pub fn checklist_drafts_key(document_id: &str, page_number: u32) -> String {
    format!("checklist/drafts/{}/page_{}.json", document_id, page_number)
}

/// 整份文档合并后的清单
pub fn checklist_aggregate_key(document_id: &str) -> String {
    format!("checklist/aggregate/{}/result.json", document_id)
}

/// 根据键的扩展名推断内容类型
pub fn content_type_for_key(key: &str) -> &'static str {
    let extension = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
