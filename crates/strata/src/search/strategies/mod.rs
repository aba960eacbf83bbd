//! Built-in search strategies

pub mod fulltext;
pub mod importance;
pub mod recency;
pub mod sparse;
pub mod vector;

pub use fulltext::FullTextStrategy;
pub use importance::ImportanceStrategy;
pub use recency::RecencyStrategy;
pub use sparse::SparseStrategy;
pub use vector::VectorStrategy;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::memory::types::MemoryItem;
use crate::storage::{ListOrder, MemoryFilter, MemoryStorage};

/// Unexpired items matching `filter`
pub(crate) async fn candidates(
    storage: &dyn MemoryStorage,
    tenant_id: &str,
    filter: &MemoryFilter,
    now: DateTime<Utc>,
) -> Result<Vec<MemoryItem>> {
    let mut items = storage
        .list(tenant_id, filter, ListOrder::CreatedAtDesc, None)
        .await?;
    items.retain(|item| !item.is_expired(now));
    Ok(items)
}
