use crate::discovery::absolutize;
use crate::fetcher::PageSource;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static NON_CONTENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(logo|icon|avatar|sprite|pixel|tracking|badge)").unwrap());

/// Picks the best event image from a detail page via an ordered candidate
/// chain: structured metadata, hero containers, galleries, then the largest
/// declared `<img>` in the content, and finally the configured placeholder.
pub struct ImageSelector {
    placeholder_url: String,
}

impl ImageSelector {
    pub fn new(placeholder_url: &str) -> Self {
        Self {
            placeholder_url: placeholder_url.to_string(),
        }
    }

    /// Walk the candidate chain without network validation.
    pub fn select(&self, html: &str, page_url: &str) -> String {
        self.candidates(html, page_url)
            .into_iter()
            .next()
            .unwrap_or_else(|| self.placeholder_url.clone())
    }

    /// Walk the candidate chain, probing each candidate with a HEAD request.
    /// A candidate that fails the probe is skipped, never fatal.
    pub async fn select_validated(
        &self,
        html: &str,
        page_url: &str,
        source: &dyn PageSource,
    ) -> String {
        for candidate in self.candidates(html, page_url) {
            if source.probe(&candidate).await {
                return candidate;
            }
            debug!("Image candidate failed validation: {}", candidate);
        }
        self.placeholder_url.clone()
    }

    /// All candidates in trust order, already absolutized and filtered.
    fn candidates(&self, html: &str, page_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut found = Vec::new();

        if let Some(url) = og_image(&document, page_url) {
            found.push(url);
        }
        if let Some(url) = json_ld_image(&document, page_url) {
            found.push(url);
        }

        let container_chains = [
            [".hero img", ".banner img", ".stage img", "header img"].as_slice(),
            [".gallery img", ".slider img", ".carousel img", ".slideshow img"].as_slice(),
        ];
        for chain in container_chains {
            for raw in chain {
                let selector = Selector::parse(raw).unwrap();
                if let Some(url) = document
                    .select(&selector)
                    .filter_map(|img| usable_src(&img, page_url))
                    .next()
                {
                    found.push(url);
                    break;
                }
            }
        }

        if let Some(url) = largest_content_image(&document, page_url) {
            found.push(url);
        }

        found.dedup();
        found
    }
}

fn og_image(document: &Html, page_url: &str) -> Option<String> {
    let selector = Selector::parse("meta[property=\"og:image\"]").unwrap();
    let content = document.select(&selector).next()?.value().attr("content")?;
    let absolute = absolutize(page_url, content)?;
    (!NON_CONTENT_RE.is_match(&absolute)).then_some(absolute)
}

fn json_ld_image(document: &Html, page_url: &str) -> Option<String> {
    let selector = Selector::parse("script[type=\"application/ld+json\"]").unwrap();
    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let image = match value.get("image") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => {
                items.first().and_then(|v| v.as_str()).map(str::to_string)
            }
            Some(serde_json::Value::Object(map)) => {
                map.get("url").and_then(|v| v.as_str()).map(str::to_string)
            }
            _ => None,
        };
        if let Some(image) = image {
            if let Some(absolute) = absolutize(page_url, &image) {
                if !NON_CONTENT_RE.is_match(&absolute) {
                    return Some(absolute);
                }
            }
        }
    }
    None
}

/// Largest `<img>` by declared width*height in the main content area,
/// skipping anything that smells like chrome rather than content.
fn largest_content_image(document: &Html, page_url: &str) -> Option<String> {
    let scopes = ["main img", "article img", ".content img", "body img"];
    for raw in scopes {
        let selector = Selector::parse(raw).unwrap();
        let best = document
            .select(&selector)
            .filter_map(|img| {
                let url = usable_src(&img, page_url)?;
                let area = declared_area(&img);
                Some((url, area))
            })
            .max_by_key(|(_, area)| *area);
        if let Some((url, _)) = best {
            return Some(url);
        }
    }
    None
}

fn declared_area(img: &ElementRef) -> u64 {
    let dimension = |name: &str| {
        img.value()
            .attr(name)
            .and_then(|v| v.trim_end_matches("px").parse::<u64>().ok())
            .unwrap_or(1)
    };
    dimension("width") * dimension("height")
}

fn usable_src(img: &ElementRef, page_url: &str) -> Option<String> {
    let src = img
        .value()
        .attr("src")
        .or_else(|| img.value().attr("data-src"))?;
    let alt = img.value().attr("alt").unwrap_or_default();
    if NON_CONTENT_RE.is_match(src) || NON_CONTENT_RE.is_match(alt) {
        return None;
    }
    absolutize(page_url, src).filter(|url| !NON_CONTENT_RE.is_match(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.alpenregion-tourismus.de/veranstaltung/almfest";
    const PLACEHOLDER: &str = "https://example.com/placeholder.jpg";

    fn selector() -> ImageSelector {
        ImageSelector::new(PLACEHOLDER)
    }

    #[test]
    fn og_image_wins_over_everything() {
        let html = r#"
            <html><head>
            <meta property="og:image" content="https://cdn.example.com/almfest.jpg">
            </head><body>
            <div class="hero"><img src="/bilder/hero.jpg"></div>
            </body></html>"#;
        assert_eq!(selector().select(html, PAGE), "https://cdn.example.com/almfest.jpg");
    }

    #[test]
    fn hero_image_resolved_relative_to_page() {
        let html = r#"<div class="hero"><img src="/bilder/hero.jpg"></div>"#;
        assert_eq!(
            selector().select(html, PAGE),
            "https://www.alpenregion-tourismus.de/bilder/hero.jpg"
        );
    }

    #[test]
    fn logos_are_never_picked() {
        let html = r#"
            <header><img src="/static/logo.png" width="400" height="400"></header>
            <main><img src="/bilder/fest.jpg" width="100" height="100"></main>"#;
        assert_eq!(
            selector().select(html, PAGE),
            "https://www.alpenregion-tourismus.de/bilder/fest.jpg"
        );
    }

    #[test]
    fn largest_declared_image_wins_in_content() {
        let html = r#"
            <main>
                <img src="/a.jpg" width="100" height="100">
                <img src="/b.jpg" width="800" height="600">
                <img src="/c.jpg" width="50" height="50">
            </main>"#;
        assert_eq!(
            selector().select(html, PAGE),
            "https://www.alpenregion-tourismus.de/b.jpg"
        );
    }

    #[test]
    fn placeholder_when_nothing_usable() {
        let html = r#"<body><img src="/static/logo.svg" alt="Logo"></body>"#;
        assert_eq!(selector().select(html, PAGE), PLACEHOLDER);
    }

    #[tokio::test]
    async fn failed_probe_falls_through_the_chain() {
        struct RejectFirst;
        #[async_trait::async_trait]
        impl crate::fetcher::PageSource for RejectFirst {
            async fn fetch(&self, _url: &str) -> crate::error::Result<String> {
                unreachable!("validation never fetches bodies")
            }
            async fn probe(&self, url: &str) -> bool {
                !url.contains("dead")
            }
        }

        let html = r#"
            <meta property="og:image" content="https://cdn.example.com/dead.jpg">
            <div class="hero"><img src="/bilder/hero.jpg"></div>"#;
        let chosen = selector().select_validated(html, PAGE, &RejectFirst).await;
        assert_eq!(chosen, "https://www.alpenregion-tourismus.de/bilder/hero.jpg");
    }

    #[test]
    fn json_ld_image_object_form() {
        let html = r#"
            <script type="application/ld+json">
            {"@type":"Event","image":{"url":"https://cdn.example.com/ld.jpg"}}
            </script>"#;
        assert_eq!(selector().select(html, PAGE), "https://cdn.example.com/ld.jpg");
    }
}
