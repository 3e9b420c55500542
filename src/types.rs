use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed category taxonomy; anything unrecognized lands in `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Music,
    Sport,
    Culture,
    Family,
    Culinary,
    Market,
    Nature,
    Wellness,
    General,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Music => "music",
            EventCategory::Sport => "sport",
            EventCategory::Culture => "culture",
            EventCategory::Family => "family",
            EventCategory::Culinary => "culinary",
            EventCategory::Market => "market",
            EventCategory::Nature => "nature",
            EventCategory::Wellness => "wellness",
            EventCategory::General => "general",
        }
    }
}

impl Default for EventCategory {
    fn default() -> Self {
        EventCategory::General
    }
}

/// A named reduced tariff (children, students, seniors, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDiscount {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PriceInfo {
    pub amount: Option<f64>,
    pub currency: String,
    pub is_free: bool,
    /// Upper bound when the page advertises a range; `amount` holds the minimum.
    pub max_amount: Option<f64>,
    pub discounts: Vec<PriceDiscount>,
    pub sold_out: bool,
}

impl PriceInfo {
    pub fn free() -> Self {
        Self {
            amount: Some(0.0),
            currency: "EUR".to_string(),
            is_free: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.is_free && self.amount.is_none() && self.discounts.is_empty() && !self.sold_out
    }
}

/// One concrete calendar occurrence of one physical event. A recurring
/// event on N dates yields N rows sharing `source_url` but with distinct
/// `external_id`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOccurrence {
    /// Stable upsert key derived from `source_url`, with an ISO date suffix
    /// when one detail page resolves to several dates.
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub image_url: String,
    pub source_url: String,
    pub category: EventCategory,
    pub price_info: PriceInfo,
    pub contact_info: Option<String>,
    pub is_featured: bool,
    pub is_active: bool,
}

/// Derive the stable identity for a detail page URL.
pub fn external_id_for(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Ephemeral per-crawl pagination bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct PaginationState {
    pub total_pages: usize,
    pub current_page: usize,
    pub next_page_url: Option<String>,
}
