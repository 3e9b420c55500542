pub mod category;
pub mod contact;
pub mod datetime;
pub mod image;
pub mod location;
pub mod price;

pub use category::CategoryClassifier;
pub use contact::ContactExtractor;
pub use datetime::{DateExtraction, DateTimeExtractor};
pub use image::ImageSelector;
pub use location::{LocationExtractor, LocationResult};
pub use price::PriceExtractor;

use crate::config::Config;
use crate::discovery::EventLink;
use crate::types::{EventCategory, PriceInfo};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static TRAILING_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,\s]*\d{1,2}\.\d{1,2}\.(\d{4})?\s*$").unwrap());

/// Everything the field extractors could pull out of one page (or one
/// listing card). Listing and detail extractions share this shape so the
/// assembler can merge them field by field.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dates: DateExtraction,
    pub image_url: Option<String>,
    pub price: Option<PriceInfo>,
    pub category: Option<EventCategory>,
    pub location: LocationResult,
    pub contact: Option<String>,
}

/// One bundle of per-field strategy chains, configured once per crawl.
pub struct ExtractorSet {
    datetime: DateTimeExtractor,
    image: ImageSelector,
}

impl ExtractorSet {
    pub fn new(config: &Config) -> Self {
        Self {
            datetime: DateTimeExtractor::new(
                config.crawl.grace_window_days,
                config.crawl.max_future_days,
            ),
            image: ImageSelector::new(&config.source.placeholder_image_url),
        }
    }

    pub fn datetime(&self) -> &DateTimeExtractor {
        &self.datetime
    }

    pub fn image(&self) -> &ImageSelector {
        &self.image
    }

    /// Quick extraction from a listing card: only what the anchor itself
    /// carries. Serves as the fallback layer under the detail extraction.
    pub fn extract_listing_card(&self, link: &EventLink, now: NaiveDateTime) -> ExtractedFields {
        let dates = self.datetime.extract_from_text(&link.anchor_text, now);
        let name = strip_trailing_date(&link.anchor_text);
        ExtractedFields {
            name: (!name.is_empty()).then_some(name),
            dates,
            ..Default::default()
        }
    }

    /// Deep extraction over a fetched detail page, running every field
    /// strategy chain.
    pub fn extract_detail_page(
        &self,
        html: &str,
        page_url: &str,
        now: NaiveDateTime,
    ) -> ExtractedFields {
        let document = Html::parse_document(html);
        let name = page_title(&document);
        let description = page_description(&document);

        let text = full_text(&document);
        let category = CategoryClassifier::classify(
            html,
            page_url,
            name.as_deref().unwrap_or_default(),
            description.as_deref().unwrap_or_default(),
        );

        ExtractedFields {
            name,
            description,
            dates: self.datetime.extract_from_html(html, now),
            image_url: Some(self.image.select(html, page_url)),
            price: Some(PriceExtractor::extract(&text)),
            category: Some(category),
            location: LocationExtractor::extract(html),
            contact: ContactExtractor::extract(html),
        }
    }
}

fn page_title(document: &Html) -> Option<String> {
    let h1 = Selector::parse("h1").unwrap();
    if let Some(element) = document.select(&h1).next() {
        let text = collapse(&element.text().collect::<String>());
        if !text.is_empty() {
            return Some(text);
        }
    }
    let og_title = Selector::parse("meta[property=\"og:title\"]").unwrap();
    if let Some(content) = document
        .select(&og_title)
        .next()
        .and_then(|e| e.value().attr("content"))
    {
        let text = collapse(content);
        if !text.is_empty() {
            return Some(text);
        }
    }
    let title = Selector::parse("title").unwrap();
    document
        .select(&title)
        .next()
        .map(|e| collapse(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn page_description(document: &Html) -> Option<String> {
    for raw in ["meta[name=\"description\"]", "meta[property=\"og:description\"]"] {
        let selector = Selector::parse(raw).unwrap();
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|e| e.value().attr("content"))
        {
            let text = collapse(content);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    // First substantial paragraph in the content area
    for raw in ["main p", "article p", ".content p", "body p"] {
        let selector = Selector::parse(raw).unwrap();
        for element in document.select(&selector) {
            let text = collapse(&element.text().collect::<String>());
            if text.len() >= 40 {
                return Some(text);
            }
        }
    }
    None
}

fn full_text(document: &Html) -> String {
    let body = Selector::parse("body").unwrap();
    match document.select(&body).next() {
        Some(element) => element.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    }
}

/// "Alpine Weihnachtsmarkt, 24.12.2025" → "Alpine Weihnachtsmarkt"
fn strip_trailing_date(anchor_text: &str) -> String {
    TRAILING_DATE_RE
        .replace(anchor_text, "")
        .trim()
        .trim_end_matches(['-', '–', ','])
        .trim()
        .to_string()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
