use crate::types::{PriceDiscount, PriceInfo};
use once_cell::sync::Lazy;
use regex::Regex;

const FREE_PHRASES: [&str; 6] = [
    "eintritt frei",
    "eintritt: frei",
    "freier eintritt",
    "kostenlos",
    "kostenfrei",
    "gratis",
];

const SOLD_OUT_PHRASES: [&str; 3] = ["ausverkauft", "ausgebucht", "sold out"];

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:€\s*(\d{1,4}(?:[.,]\d{1,2})?)|(\d{1,4}(?:[.,]\d{1,2})?)\s*(?:€|EUR|Euro))").unwrap());
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:€\s*)?(\d{1,4}(?:[.,]\d{1,2})?)\s*(?:€|EUR|Euro)?\s*(?:-|–|bis)\s*(?:€\s*)?(\d{1,4}(?:[.,]\d{1,2})?)\s*(?:€|EUR|Euro)?").unwrap()
});
static DISCOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    // A currency marker is mandatory; "Kinder ab 6 Jahren" is not a tariff.
    Regex::new(r"(?i)(Kinder|Kind|Schüler|Studenten|Studierende|Ermäßigt|Senioren)\D{0,20}?(\d{1,4}(?:[.,]\d{1,2})?)\s*(?:€|EUR|Euro)").unwrap()
});

/// Parses admission pricing from page text. Free-admission phrasing wins
/// outright, before any numeric token is even considered, because tourism
/// pages love to mention unrelated amounts (parking fees, donations).
pub struct PriceExtractor;

impl PriceExtractor {
    pub fn extract(text: &str) -> PriceInfo {
        let lowered = text.to_lowercase();
        let sold_out = SOLD_OUT_PHRASES.iter().any(|p| lowered.contains(p));

        if FREE_PHRASES.iter().any(|p| lowered.contains(p)) {
            let mut info = PriceInfo::free();
            info.sold_out = sold_out;
            return info;
        }

        let mut info = PriceInfo {
            currency: "EUR".to_string(),
            sold_out,
            ..Default::default()
        };

        for captures in RANGE_RE.captures_iter(text) {
            // Without a currency marker this is probably a date span.
            let whole = captures[0].to_lowercase();
            if !whole.contains('€') && !whole.contains("eur") {
                continue;
            }
            let low = parse_amount(&captures[1]);
            let high = parse_amount(&captures[2]);
            if let (Some(low), Some(high)) = (low, high) {
                if low <= high {
                    // Minimum of a range is the advertised entry price.
                    info.amount = Some(low);
                    info.max_amount = Some(high);
                    break;
                }
            }
        }

        if info.amount.is_none() {
            info.amount = AMOUNT_RE
                .captures_iter(text)
                .filter_map(|c| {
                    let raw = c.get(1).or_else(|| c.get(2))?;
                    parse_amount(raw.as_str())
                })
                .next();
        }

        for captures in DISCOUNT_RE.captures_iter(text) {
            if let Some(amount) = parse_amount(&captures[2]) {
                let label = captures[1].to_lowercase();
                if !info.discounts.iter().any(|d| d.label == label) {
                    info.discounts.push(PriceDiscount { label, amount });
                }
            }
        }

        info
    }
}

/// Locale-aware decimal normalization: "12,50" means 12.5 here.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}
