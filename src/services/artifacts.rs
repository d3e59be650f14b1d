//! 阶段之间传递的 JSON 中间产物

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;
use crate::infrastructure::BlobStore;

pub async fn store_json<T: Serialize>(blobs: &dyn BlobStore, key: &str, value: &T) -> Result<(), PipelineError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| PipelineError::CorruptArtifact {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    blobs.put(key, bytes, "application/json").await?;
    Ok(())
}

pub async fn load_json<T: DeserializeOwned>(blobs: &dyn BlobStore, key: &str) -> Result<T, PipelineError> {
    let bytes = blobs.get(key).await?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::CorruptArtifact {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
