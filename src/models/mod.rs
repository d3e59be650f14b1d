pub mod checklist;
pub mod review;
pub mod storage_keys;

pub use checklist::{
    ChecklistItem, ChecklistItemDraft, DocumentStatus, FlowData, FlowDraft, ItemId, ItemType, LocalId,
    PageDrafts,
};
pub use review::{
    ReviewDocument, ReviewFileType, ReviewJob, ReviewJobStats, ReviewJobStatus, ReviewResult,
    ReviewResultDetail, ReviewResultStatus, ReviewVerdict, Verdict,
};
