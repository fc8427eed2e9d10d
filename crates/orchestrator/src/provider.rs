//! Upstream generation capability consumed per bulk item.

use async_trait::async_trait;

use shopops_core::TenantId;

/// One sub-item of a bulk run.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    /// Stable reference used in the error log ("item:3", a product id, ...)
    pub item_ref: String,
    pub payload: serde_json::Value,
}

impl BulkItem {
    pub fn new(item_ref: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            item_ref: item_ref.into(),
            payload,
        }
    }

    /// Parse the `items` array out of a bulk job's config.
    ///
    /// Accepts an array of strings (bare refs) or objects carrying a `ref`
    /// field; anything else is an error at the batch boundary, not a
    /// per-item failure.
    pub fn parse_items(config: &serde_json::Value) -> Result<Vec<BulkItem>, String> {
        let items = config
            .get("items")
            .and_then(|v| v.as_array())
            .ok_or_else(|| "config has no `items` array".to_string())?;

        items
            .iter()
            .enumerate()
            .map(|(i, value)| match value {
                serde_json::Value::String(item_ref) => {
                    Ok(BulkItem::new(item_ref.clone(), serde_json::Value::Null))
                }
                serde_json::Value::Object(map) => {
                    let item_ref = map
                        .get("ref")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("item:{}", i + 1));
                    Ok(BulkItem::new(item_ref, value.clone()))
                }
                other => Err(format!("items[{i}] is neither a ref nor an object: {other}")),
            })
            .collect()
    }
}

/// Structured content returned for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub content: serde_json::Value,
}

impl GeneratedContent {
    pub fn new(content: serde_json::Value) -> Self {
        Self { content }
    }
}

/// Upstream capability failure.
///
/// Inside the bulk loop all variants are per-item failures; only outside the
/// isolation boundary do they abort the batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rate-limited: {0}")]
    RateLimited(String),
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Single request/response generation call, one per bulk item.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate(
        &self,
        tenant_id: TenantId,
        item: &BulkItem,
    ) -> Result<GeneratedContent, ProviderError>;
}
