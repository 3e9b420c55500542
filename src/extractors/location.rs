use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static POSTAL_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    // "Dorfstraße 12, 83324 Ruhpolding" and similar shapes
    Regex::new(r"\b\d{4,5}\s+[A-ZÄÖÜ][\wäöüß.-]+").unwrap()
});
static STREET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[\wäöüß-]*(straße|strasse|weg|platz|gasse|allee)\b\s*\d*").unwrap()
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationResult {
    pub venue: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationResult {
    pub fn is_empty(&self) -> bool {
        self.venue.is_none() && self.address.is_none()
    }
}

/// Finds where an event takes place. Venue addresses routinely hide inside
/// accordions and tab panels, so the scan covers collapsed containers too.
pub struct LocationExtractor;

impl LocationExtractor {
    pub fn extract(html: &str) -> LocationResult {
        let document = Html::parse_document(html);
        let mut result = LocationResult::default();

        // Structured microdata first: it is unambiguous.
        if let Some(address) = microdata_address(&document) {
            result.address = Some(address);
        }
        if result.address.is_none() {
            if let Some((venue, address)) = json_ld_location(&document) {
                result.venue = venue;
                result.address = address;
            }
        }

        if let Some((lat, lon)) = coordinates(&document) {
            result.latitude = Some(lat);
            result.longitude = Some(lon);
        }

        if result.address.is_none() {
            result.address = address_shaped_fragment(&document);
        }

        if result.venue.is_none() {
            result.venue = venue_label(&document);
        }

        result
    }
}

fn microdata_address(document: &Html) -> Option<String> {
    let selectors = ["[itemprop=\"address\"]", ".adr", "address"];
    for raw in selectors {
        let selector = Selector::parse(raw).unwrap();
        if let Some(element) = document.select(&selector).next() {
            let text = collapse(&element.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn json_ld_location(document: &Html) -> Option<(Option<String>, Option<String>)> {
    let selector = Selector::parse("script[type=\"application/ld+json\"]").unwrap();
    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let Some(location) = value.get("location") else {
            continue;
        };
        let venue = location
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let address = match location.get("address") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(map)) => {
                let parts: Vec<&str> = ["streetAddress", "postalCode", "addressLocality"]
                    .iter()
                    .filter_map(|k| map.get(*k).and_then(|v| v.as_str()))
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            }
            _ => None,
        };
        if venue.is_some() || address.is_some() {
            return Some((venue, address));
        }
    }
    None
}

fn coordinates(document: &Html) -> Option<(f64, f64)> {
    let lat_selector = Selector::parse("meta[property=\"place:location:latitude\"]").unwrap();
    let lon_selector = Selector::parse("meta[property=\"place:location:longitude\"]").unwrap();
    let lat = document
        .select(&lat_selector)
        .next()?
        .value()
        .attr("content")?
        .parse()
        .ok()?;
    let lon = document
        .select(&lon_selector)
        .next()?
        .value()
        .attr("content")?
        .parse()
        .ok()?;
    Some((lat, lon))
}

/// Longest address-shaped text fragment, searched across visible text and
/// commonly collapsed containers.
fn address_shaped_fragment(document: &Html) -> Option<String> {
    let mut best: Option<String> = None;
    for fragment in searchable_fragments(document) {
        let has_postal = POSTAL_ADDRESS_RE.is_match(&fragment);
        let has_street = STREET_RE.is_match(&fragment);
        if (has_postal || has_street) && fragment.len() <= 160 {
            if best.as_ref().map_or(true, |b| fragment.len() > b.len()) {
                best = Some(fragment);
            }
        }
    }
    best
}

fn venue_label(document: &Html) -> Option<String> {
    let selectors = [".venue", ".location-name", ".ort", "[itemprop=\"location\"] [itemprop=\"name\"]"];
    for raw in selectors {
        let selector = Selector::parse(raw).unwrap();
        if let Some(element) = document.select(&selector).next() {
            let text = collapse(&element.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Text fragments worth scanning: paragraphs, list items, table cells, and
/// the bodies of accordions/tabs/`<details>` that render collapsed.
pub fn searchable_fragments(document: &Html) -> Vec<String> {
    let selectors = [
        "p",
        "li",
        "td",
        "dd",
        ".accordion",
        ".accordion-content",
        ".tab-content",
        ".collapse",
        "details",
        "[hidden]",
    ];
    let mut fragments = Vec::new();
    for raw in selectors {
        let selector = Selector::parse(raw).unwrap();
        for element in document.select(&selector) {
            let text = collapse(&element.text().collect::<String>());
            if !text.is_empty() {
                fragments.push(text);
            }
        }
    }
    fragments
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microdata_address_preferred() {
        let html = r#"
            <div itemprop="address">Seestraße 5, 83324 Ruhpolding</div>
            <p>Irgendwo anders: Bahnhofstraße 1</p>"#;
        let result = LocationExtractor::extract(html);
        assert_eq!(result.address.as_deref(), Some("Seestraße 5, 83324 Ruhpolding"));
    }

    #[test]
    fn address_found_inside_accordion() {
        let html = r#"
            <div class="accordion">
                <h3>Anfahrt</h3>
                <div class="accordion-content">Festhalle, Dorfplatz 3, 83334 Inzell</div>
            </div>"#;
        let result = LocationExtractor::extract(html);
        assert!(result.address.is_some());
        assert!(result.address.unwrap().contains("83334"));
    }

    #[test]
    fn longest_address_fragment_wins() {
        let html = r#"
            <p>Am Dorfplatz</p>
            <p>Veranstaltungsort: Kurhaus, Kurhausstraße 12, 83435 Bad Reichenhall</p>"#;
        let result = LocationExtractor::extract(html);
        assert!(result.address.unwrap().contains("Kurhausstraße 12"));
    }

    #[test]
    fn json_ld_location_with_structured_address() {
        let html = r#"
            <script type="application/ld+json">
            {"@type":"Event","location":{"name":"Festhalle","address":{"streetAddress":"Seeweg 2","postalCode":"83324","addressLocality":"Ruhpolding"}}}
            </script>"#;
        let result = LocationExtractor::extract(html);
        assert_eq!(result.venue.as_deref(), Some("Festhalle"));
        assert_eq!(result.address.as_deref(), Some("Seeweg 2 83324 Ruhpolding"));
    }

    #[test]
    fn coordinates_from_meta_tags() {
        let html = r#"
            <meta property="place:location:latitude" content="47.76">
            <meta property="place:location:longitude" content="12.65">"#;
        let result = LocationExtractor::extract(html);
        assert_eq!(result.latitude, Some(47.76));
        assert_eq!(result.longitude, Some(12.65));
    }

    #[test]
    fn nothing_found_stays_empty() {
        let result = LocationExtractor::extract("<p>Ein gemütlicher Abend</p>");
        assert!(result.is_empty());
    }
}
