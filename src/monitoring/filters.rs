//! Discovery filters

use crate::api::SubItem;
use crate::config::{Range, SnipeConfig};

/// Keyword, supply and price filters of one discovery account
#[derive(Debug, Clone, Default)]
pub struct SnipeFilter {
    /// Lowercased, blanks removed
    keywords: Vec<String>,
    supply_range: Option<Range>,
    price_range: Option<Range>,
}

impl SnipeFilter {
    pub fn new(keywords: &[String], supply_range: Option<Range>, price_range: Option<Range>) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            supply_range,
            price_range,
        }
    }

    /// Case-insensitive substring match of any keyword; no keywords matches all
    pub fn matches_title(&self, title: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let title = title.to_lowercase();
        self.keywords.iter().any(|k| title.contains(k.as_str()))
    }

    /// Why a sub-item fails, `None` when every filter passes
    pub fn rejection(&self, parent_title: &str, sub_item: &SubItem) -> Option<&'static str> {
        if !self.matches_title(parent_title) {
            return Some("title");
        }
        if let Some(range) = self.supply_range {
            if !range.contains(sub_item.supply) {
                return Some("supply");
            }
        }
        if let Some(range) = self.price_range {
            if !range.contains(sub_item.price) {
                return Some("price");
            }
        }
        None
    }

    pub fn matches(&self, parent_title: &str, sub_item: &SubItem) -> bool {
        self.rejection(parent_title, sub_item).is_none()
    }
}

impl From<&SnipeConfig> for SnipeFilter {
    fn from(config: &SnipeConfig) -> Self {
        Self::new(&config.word_filter, config.supply_range, config.price_range)
    }
}
