use crate::config::CrawlConfig;
use crate::error::{Result, ScraperError};
use crate::extractors::{DateExtraction, ExtractedFields};
use crate::types::{external_id_for, EventOccurrence, PriceInfo};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

/// Merges listing-page quick extraction with detail-page deep extraction and
/// turns the result into persistable occurrences. A page that resolved to
/// several dates explodes into one occurrence per date, all sharing the
/// `source_url` but carrying date-suffixed identities.
pub struct EventAssembler {
    name_max_len: usize,
    description_max_len: usize,
    placeholder_image_url: String,
}

impl EventAssembler {
    pub fn new(crawl: &CrawlConfig, placeholder_image_url: &str) -> Self {
        Self {
            name_max_len: crawl.name_max_len,
            description_max_len: crawl.description_max_len,
            placeholder_image_url: placeholder_image_url.to_string(),
        }
    }

    pub fn assemble(
        &self,
        listing: &ExtractedFields,
        detail: &ExtractedFields,
        source_url: &str,
        now: NaiveDateTime,
    ) -> Result<Vec<EventOccurrence>> {
        let merged = merge_fields(listing, detail);

        let name = merged
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ScraperError::Assembly {
                url: source_url.to_string(),
                reason: "no event name".to_string(),
            })?;
        let name = truncate(name, self.name_max_len);

        if merged.dates.is_empty() {
            let reason = if merged.dates.is_recurring {
                "recurring schedule without a concrete date"
            } else {
                "no parseable start date"
            };
            return Err(ScraperError::Assembly {
                url: source_url.to_string(),
                reason: reason.to_string(),
            });
        }

        let base_id = external_id_for(source_url);
        let multiple = merged.dates.dates.len() > 1;
        let description = merged
            .description
            .as_deref()
            .map(|d| truncate(d, self.description_max_len));
        let image_url = merged
            .image_url
            .clone()
            .unwrap_or_else(|| self.placeholder_image_url.clone());
        let price_info = merged.price.clone().unwrap_or_else(|| PriceInfo {
            currency: "EUR".to_string(),
            ..Default::default()
        });

        let occurrences = merged
            .dates
            .dates
            .iter()
            .map(|date| {
                let external_id = if multiple {
                    format!("{}_{}", base_id, date.format("%Y-%m-%d"))
                } else {
                    base_id.clone()
                };
                EventOccurrence {
                    external_id,
                    name: name.clone(),
                    description: description.clone(),
                    location: merged.location.venue.clone(),
                    address: merged.location.address.clone(),
                    latitude: merged.location.latitude,
                    longitude: merged.location.longitude,
                    start_date: to_utc(*date),
                    end_date: merged.dates.end_date.filter(|e| e > date).map(to_utc),
                    image_url: image_url.clone(),
                    source_url: source_url.to_string(),
                    category: merged.category.unwrap_or_default(),
                    price_info: price_info.clone(),
                    contact_info: merged.contact.clone(),
                    is_featured: false,
                    is_active: true,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Assembled {} occurrence(s) from {} (now={})",
            occurrences.len(),
            source_url,
            now
        );
        Ok(occurrences)
    }
}

/// Field-by-field merge where detail-page values win, except when the detail
/// extraction came up empty and the listing still knows something.
fn merge_fields(listing: &ExtractedFields, detail: &ExtractedFields) -> ExtractedFields {
    ExtractedFields {
        name: detail.name.clone().or_else(|| listing.name.clone()),
        description: detail
            .description
            .clone()
            .or_else(|| listing.description.clone()),
        dates: if detail.dates.is_empty() && !listing.dates.is_empty() {
            listing.dates.clone()
        } else {
            DateExtraction {
                // A recurring flag from either side survives the merge.
                is_recurring: detail.dates.is_recurring || listing.dates.is_recurring,
                ..detail.dates.clone()
            }
        },
        image_url: detail.image_url.clone().or_else(|| listing.image_url.clone()),
        price: detail
            .price
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| listing.price.clone()),
        category: detail.category.or(listing.category),
        location: if detail.location.is_empty() {
            listing.location.clone()
        } else {
            detail.location.clone()
        },
        contact: detail.contact.clone().or_else(|| listing.contact.clone()),
    }
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    text.chars().take(max_len).collect()
}
