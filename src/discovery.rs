use crate::types::PaginationState;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;

static PAGE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());
static DATE_LIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}\.\d{1,2}\.").unwrap());

/// Anchor-text keywords that mark an event announcement even when the href
/// carries no recognizable token.
const EVENT_KEYWORDS: [&str; 10] = [
    "konzert",
    "fest",
    "markt",
    "führung",
    "wanderung",
    "ausstellung",
    "theater",
    "lesung",
    "turnier",
    "veranstaltung",
];

/// Href fragments that identify an event detail page on this portal.
const DETAIL_TOKENS: [&str; 4] = ["/veranstaltung", "/event", "/termin", "event_id="];

/// Navigation, category and filter paths which heuristic 3 must not follow.
const EXCLUDED_PATHS: [&str; 6] = [
    "/kategorie",
    "/filter",
    "/seite",
    "/suche",
    "/newsletter",
    "/impressum",
];

/// Candidate event-detail link found on a listing page, tagged with the
/// heuristic that discovered it.
#[derive(Debug, Clone)]
pub struct EventLink {
    pub url: String,
    pub anchor_text: String,
    pub source: LinkSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    UrlToken,
    EventCard,
    TextHeuristic,
}

/// Estimates how many listing pages exist by probing pagination markers in
/// order. The orchestrator treats an empty page, not this number, as the
/// authoritative stop signal.
pub fn detect_total_pages(html: &str, default_max: usize) -> PaginationState {
    let document = Html::parse_document(html);
    let mut total = 0usize;

    let container_selectors = [".pagination a", ".pager a", "nav.pagination a", "ul.pages a"];
    for raw in container_selectors {
        let selector = Selector::parse(raw).unwrap();
        for anchor in document.select(&selector) {
            let text = anchor.text().collect::<String>();
            if let Ok(n) = text.trim().parse::<usize>() {
                total = total.max(n);
            }
            if let Some(href) = anchor.value().attr("href") {
                if let Some(captures) = PAGE_PARAM_RE.captures(href) {
                    if let Ok(n) = captures[1].parse::<usize>() {
                        total = total.max(n);
                    }
                }
            }
        }
        if total > 0 {
            break;
        }
    }

    // Page-parameter links outside any pagination container still count.
    if total == 0 {
        let any_anchor = Selector::parse("a[href]").unwrap();
        for anchor in document.select(&any_anchor) {
            if let Some(href) = anchor.value().attr("href") {
                if let Some(captures) = PAGE_PARAM_RE.captures(href) {
                    if let Ok(n) = captures[1].parse::<usize>() {
                        total = total.max(n);
                    }
                }
            }
        }
    }

    // A bare "next" control proves at least one more page without a count.
    let mut next_page_url = None;
    let next_selector = Selector::parse("a[rel=\"next\"]").unwrap();
    if let Some(next) = document.select(&next_selector).next() {
        next_page_url = next.value().attr("href").map(|h| h.to_string());
        total = total.max(2);
    } else {
        let any_anchor = Selector::parse("a[href]").unwrap();
        for anchor in document.select(&any_anchor) {
            let text = anchor.text().collect::<String>().to_lowercase();
            let text = text.trim();
            if text == "weiter" || text.starts_with("nächste") || text == "»" {
                next_page_url = anchor.value().attr("href").map(|h| h.to_string());
                total = total.max(2);
                break;
            }
        }
    }

    if total == 0 {
        debug!("No pagination markers found; assuming {} pages", default_max);
        total = default_max;
    }

    PaginationState {
        total_pages: total,
        current_page: 1,
        next_page_url,
    }
}

/// Runs all three discovery heuristics over one listing page and merges the
/// results keyed by normalized href, so a link found twice is kept once.
pub fn discover_event_links(html: &str, base_url: &str) -> Vec<EventLink> {
    let document = Html::parse_document(html);
    // Insertion-ordered merge: the first heuristic to find a link keeps it.
    let mut seen: HashSet<String> = HashSet::new();
    let mut links: Vec<EventLink> = Vec::new();

    let mut push = |url: String, anchor_text: String, source: LinkSource| {
        let key = normalize_href(&url);
        if seen.insert(key) {
            links.push(EventLink {
                url,
                anchor_text,
                source,
            });
        }
    };

    // Heuristic 1: event tokens in the href itself.
    let any_anchor = Selector::parse("a[href]").unwrap();
    for anchor in document.select(&any_anchor) {
        let href = anchor.value().attr("href").unwrap_or_default();
        if DETAIL_TOKENS.iter().any(|t| href.contains(t)) && !is_excluded(href) {
            if let Some(absolute) = absolutize(base_url, href) {
                let text = collapse_whitespace(&anchor.text().collect::<String>());
                push(absolute, text, LinkSource::UrlToken);
            }
        }
    }

    // Heuristic 2: known event-card containers, take their primary link.
    let card_selectors = [
        ".event-item a[href]",
        ".event-card a[href]",
        "article.event a[href]",
        ".veranstaltung a[href]",
        "[class*=\"event-list\"] li a[href]",
    ];
    for raw in card_selectors {
        let selector = Selector::parse(raw).unwrap();
        for anchor in document.select(&selector) {
            let href = anchor.value().attr("href").unwrap_or_default();
            if is_excluded(href) {
                continue;
            }
            if let Some(absolute) = absolutize(base_url, href) {
                let text = collapse_whitespace(&anchor.text().collect::<String>());
                push(absolute, text, LinkSource::EventCard);
            }
        }
    }

    // Heuristic 3: anchor text that reads like an event announcement.
    for anchor in document.select(&any_anchor) {
        let href = anchor.value().attr("href").unwrap_or_default();
        if is_excluded(href) {
            continue;
        }
        let text = collapse_whitespace(&anchor.text().collect::<String>());
        let lowered = text.to_lowercase();
        let looks_like_event = DATE_LIKE_RE.is_match(&text)
            || EVENT_KEYWORDS.iter().any(|k| lowered.contains(k));
        if looks_like_event {
            if let Some(absolute) = absolutize(base_url, href) {
                push(absolute, text, LinkSource::TextHeuristic);
            }
        }
    }

    debug!("Discovered {} candidate event links", links.len());
    links
}

fn is_excluded(href: &str) -> bool {
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return true;
    }
    EXCLUDED_PATHS.iter().any(|p| href.contains(p))
}

/// Resolve an href against the page URL; anything that does not come out as
/// http(s) is dropped.
pub fn absolutize(base_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Dedup key: scheme/host/path plus any query, minus fragment and tracking
/// parameters.
fn normalize_href(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| !k.starts_with("utm_") && k != "ref" && k != "fbclid")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                let query = kept
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                parsed.set_query(Some(&query));
            }
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
