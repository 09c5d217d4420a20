use serde::{Deserialize, Serialize};

/// How the indexer shapes reply threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerMode {
    /// Each row carries a nested page of replies.
    #[default]
    Nested,
    /// Replies are listed alongside top-level rows; no reply pages.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub indexer_mode: IndexerMode,
    /// Limit given to reply pages created for optimistic rows.
    pub reply_page_limit: usize,
    /// Trees nested deeper than this are rejected as malformed.
    pub max_depth: usize,
    /// Root-level posts aimed at another target are not shown in this cache.
    pub target_uri: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            indexer_mode: IndexerMode::Nested,
            reply_page_limit: 5,
            max_depth: 16,
            target_uri: None,
        }
    }
}

impl CacheConfig {
    pub fn with_mode(mut self, mode: IndexerMode) -> Self {
        self.indexer_mode = mode;
        self
    }

    pub fn with_target_uri(mut self, target_uri: impl Into<String>) -> Self {
        self.target_uri = Some(target_uri.into());
        self
    }

    pub(crate) fn reply_limit(&self) -> usize {
        self.reply_page_limit.max(1)
    }
}
