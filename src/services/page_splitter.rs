//! 页面拆分服务
//!
//! 把一份源文档拆成 N 个单页文档，逐页写入 blob 存储，
//! 之后各页的抽取可以独立重试，无需重新拆分。

use lopdf::Document;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::infrastructure::BlobStore;
use crate::models::storage_keys::{checklist_page_key, content_type_for_key};

/// 拆分出的单页文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRef {
    /// 从 1 开始，连续编号
    pub page_number: u32,
    pub blob_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Png,
    Jpeg,
}

impl SourceFormat {
    /// 优先按文件头识别，识别不出时再看键的扩展名
    pub fn detect(bytes: &[u8], key: &str) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(SourceFormat::Pdf);
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(SourceFormat::Png);
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(SourceFormat::Jpeg);
        }
        match content_type_for_key(key) {
            "application/pdf" => Some(SourceFormat::Pdf),
            "image/png" => Some(SourceFormat::Png),
            "image/jpeg" => Some(SourceFormat::Jpeg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Png => "png",
            SourceFormat::Jpeg => "jpg",
        }
    }
}

/// 拆分 `source_key` 指向的文档
///
/// - PDF：每页生成一个单页 PDF
/// - PNG / JPEG：视为只有一页的文档
/// - 没有页面时返回 `EmptyDocument`
pub async fn split_document(
    blobs: &dyn BlobStore,
    document_id: &str,
    source_key: &str,
) -> Result<Vec<PageRef>, PipelineError> {
    let bytes = blobs.get(source_key).await?;
    if bytes.is_empty() {
        return Err(PipelineError::EmptyDocument {
            document_id: document_id.to_string(),
        });
    }

    let format = SourceFormat::detect(&bytes, source_key).ok_or_else(|| PipelineError::UnreadableDocument {
        document_id: document_id.to_string(),
        reason: format!("无法识别的文档格式: {}", source_key),
    })?;

    let pages: Vec<Vec<u8>> = match format {
        SourceFormat::Pdf => {
            let owner = document_id.to_string();
            tokio::task::spawn_blocking(move || split_pdf(&owner, &bytes)).await??
        }
        SourceFormat::Png | SourceFormat::Jpeg => vec![bytes],
    };

    if pages.is_empty() {
        return Err(PipelineError::EmptyDocument {
            document_id: document_id.to_string(),
        });
    }

    let extension = format.extension();
    let mut refs = Vec::with_capacity(pages.len());
    for (index, page_bytes) in pages.into_iter().enumerate() {
        let page_number = index as u32 + 1;
        let key = checklist_page_key(document_id, page_number, extension);
        debug!("[文档 {}] 写入第 {} 页: {}", document_id, page_number, key);
        blobs.put(&key, page_bytes, content_type_for_key(&key)).await?;
        refs.push(PageRef {
            page_number,
            blob_key: key,
        });
    }

    info!("[文档 {}] ✓ 拆分完成，共 {} 页", document_id, refs.len());
    Ok(refs)
}

/// 按页号顺序生成单页 PDF
fn split_pdf(document_id: &str, bytes: &[u8]) -> Result<Vec<Vec<u8>>, PipelineError> {
    let unreadable = |reason: String| PipelineError::UnreadableDocument {
        document_id: document_id.to_string(),
        reason,
    };

    let source = Document::load_mem(bytes).map_err(|e| unreadable(e.to_string()))?;
    let page_numbers: Vec<u32> = source.get_pages().keys().copied().collect();

    let mut pages = Vec::with_capacity(page_numbers.len());
    for &keep in &page_numbers {
        let mut single = source.clone();
        let others: Vec<u32> = page_numbers.iter().copied().filter(|&n| n != keep).collect();
        single.delete_pages(&others);
        single.prune_objects();

        let mut buffer = Vec::new();
        single.save_to(&mut buffer).map_err(|e| unreadable(e.to_string()))?;
        pages.push(buffer);
    }
    Ok(pages)
}
