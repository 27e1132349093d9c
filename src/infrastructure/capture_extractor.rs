//! Page extractor backed by captured page data
//!
//! Replays field bags previously read from the console, stored as a JSON
//! object keyed by app key:
//!
//! ```json
//! { "a1b2c3": { "fields": { "deployed": "Enabled", "data_source": "Tbl_Orders",
//!                           "authentication": "None", "style": "Default",
//!                           "localization": "English" },
//!               "usage_history": ["Host page 05 Jan 2023 10:00 AM"] } }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::errors::ExtractionError;
use crate::domain::item::{Item, ItemKey};
use crate::domain::raw_fields::RawFieldBag;
use crate::domain::repositories::{ExtractionSession, PageExtractor};

#[derive(Debug, Default)]
pub struct CaptureExtractor {
    pages: HashMap<ItemKey, RawFieldBag>,
}

impl CaptureExtractor {
    pub fn new(pages: HashMap<ItemKey, RawFieldBag>) -> Self {
        Self { pages }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read capture file {path:?}"))?;
        let pages: HashMap<ItemKey, RawFieldBag> = serde_json::from_str(&text)
            .with_context(|| format!("Capture file {path:?} is not valid JSON"))?;
        info!("📂 Loaded {} captured pages from {:?}", pages.len(), path);
        Ok(Self::new(pages))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[async_trait]
impl PageExtractor for CaptureExtractor {
    async fn apply_display_configuration(
        &self,
        session: &mut ExtractionSession,
    ) -> Result<(), ExtractionError> {
        // Captures were taken with the full property view; nothing to switch
        session.mark_display_configured(true);
        Ok(())
    }

    async fn extract(
        &self,
        session: &mut ExtractionSession,
        item: &Item,
    ) -> Result<RawFieldBag, ExtractionError> {
        if !session.is_display_configured() {
            return Err(ExtractionError::DisplayNotConfigured(
                "extraction attempted before display configuration".to_string(),
            ));
        }
        session.note_page_opened(&item.key);

        let bag = self
            .pages
            .get(&item.key)
            .cloned()
            .ok_or_else(|| ExtractionError::Navigation {
                key: item.key.clone(),
                reason: "no captured page for this key".to_string(),
            })?;
        debug!(
            "Replayed captured page for {} ({} usage lines)",
            item.key,
            bag.usage_history().len()
        );
        Ok(bag)
    }
}
