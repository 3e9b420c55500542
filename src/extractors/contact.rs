use crate::extractors::location::searchable_fragments;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+\d{1,3}|0)[\d\s/().-]{5,18}\d").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

const MAX_PHONES: usize = 2;
const MAX_EMAILS: usize = 2;

/// Organizer contact details. Like the venue address, these usually live in
/// collapsed accordions or tab panels, so the hidden containers are scanned
/// alongside the visible text.
pub struct ContactExtractor;

impl ContactExtractor {
    /// Returns the deduplicated contact fragments joined into one field, or
    /// `None` when the page offers nothing usable.
    pub fn extract(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let haystack = searchable_fragments(&document).join(" \n ");

        let mut parts: Vec<String> = Vec::new();

        for captures in PHONE_RE.find_iter(&haystack) {
            if parts.iter().filter(|p| p.starts_with("Tel")).count() >= MAX_PHONES {
                break;
            }
            let raw = captures.as_str().trim();
            if let Some(normalized) = valid_phone(raw) {
                let entry = format!("Tel. {normalized}");
                if !parts.contains(&entry) {
                    parts.push(entry);
                }
            }
        }

        let mut email_count = 0;
        for found in EMAIL_RE.find_iter(&haystack) {
            if email_count >= MAX_EMAILS {
                break;
            }
            let entry = found.as_str().to_lowercase();
            if !parts.contains(&entry) {
                parts.push(entry);
                email_count += 1;
            }
        }

        // A website link only matters when there is no direct mailbox.
        if email_count == 0 {
            if let Some(site) = website_link(&document) {
                parts.push(site);
            }
        }

        (!parts.is_empty()).then(|| parts.join(" | "))
    }
}

/// Length-validate a phone candidate; door numbers and zip codes match the
/// loose pattern but never carry enough digits.
fn valid_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+' || *c == '/' || *c == ' ')
        .collect();
    Some(normalized.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn website_link(document: &Html) -> Option<String> {
    let selectors = [".contact a[href]", ".kontakt a[href]", ".organizer a[href]", ".veranstalter a[href]"];
    for raw in selectors {
        let selector = Selector::parse(raw).unwrap();
        for anchor in document.select(&selector) {
            let href = anchor.value().attr("href").unwrap_or_default();
            if href.starts_with("http") {
                return Some(href.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_and_email_from_visible_text() {
        let html = r#"<p>Tourismusbüro, Tel. 08663 / 8806-0, info@alpenregion.de</p>"#;
        let contact = ContactExtractor::extract(html).unwrap();
        assert!(contact.contains("08663"));
        assert!(contact.contains("info@alpenregion.de"));
    }

    #[test]
    fn contact_found_inside_details_block() {
        let html = r#"
            <details>
                <summary>Veranstalter</summary>
                <p>Trachtenverein, veranstalter@dorf.example</p>
            </details>"#;
        let contact = ContactExtractor::extract(html).unwrap();
        assert!(contact.contains("veranstalter@dorf.example"));
    }

    #[test]
    fn at_most_two_phones_and_two_emails() {
        let html = r#"<p>
            0861 123456, 0861 654321, 0861 111222,
            a@example.com b@example.com c@example.com
        </p>"#;
        let contact = ContactExtractor::extract(html).unwrap();
        assert_eq!(contact.matches("Tel.").count(), 2);
        assert!(contact.contains("a@example.com"));
        assert!(contact.contains("b@example.com"));
        assert!(!contact.contains("c@example.com"));
    }

    #[test]
    fn short_number_groups_are_not_phones() {
        let html = r#"<p>Hausnummer 12, PLZ 83324</p>"#;
        assert!(ContactExtractor::extract(html).is_none());
    }

    #[test]
    fn website_only_as_email_fallback() {
        let html = r#"<div class="kontakt"><a href="https://verein.example">Webseite</a></div>"#;
        let contact = ContactExtractor::extract(html).unwrap();
        assert_eq!(contact, "https://verein.example");

        let with_mail = r#"
            <div class="kontakt">
                <p>mail@verein.example</p>
                <a href="https://verein.example">Webseite</a>
            </div>"#;
        let contact = ContactExtractor::extract(with_mail).unwrap();
        assert!(!contact.contains("https://"));
    }

    #[test]
    fn duplicate_fragments_collapse() {
        let html = r#"
            <p>Tel. 0861 123456</p>
            <div class="accordion-content">Tel. 0861 123456</div>"#;
        let contact = ContactExtractor::extract(html).unwrap();
        assert_eq!(contact.matches("0861").count(), 1);
    }
}
