use crate::types::EventCategory;
use scraper::{Html, Selector};

/// Keyword table per category; matched lowercase against breadcrumbs, the
/// URL path, and finally title+description.
const KEYWORDS: [(EventCategory, &[&str]); 8] = [
    (
        EventCategory::Music,
        &["konzert", "musik", "band", "chor", "blasmusik", "festival", "jazz", "sänger"],
    ),
    (
        EventCategory::Sport,
        &["sport", "lauf", "turnier", "rennen", "ski", "wandern", "wanderung", "bike", "marathon"],
    ),
    (
        EventCategory::Culture,
        &["kultur", "theater", "ausstellung", "museum", "lesung", "kino", "oper", "brauchtum"],
    ),
    (
        EventCategory::Family,
        &["familie", "kinder", "familien", "kasperl", "basteln", "märchen"],
    ),
    // Market outranks Culinary: every Weihnachtsmarkt page mentions food.
    (
        EventCategory::Market,
        &["markt", "weihnachtsmarkt", "christkindlmarkt", "flohmarkt", "bauernmarkt", "basar"],
    ),
    (
        EventCategory::Culinary,
        &["kulinarik", "verkostung", "genuss", "weinfest", "bier", "küche", "schmankerl", "brunch"],
    ),
    (
        EventCategory::Nature,
        &["natur", "almabtrieb", "kräuter", "führung", "nationalpark", "garten", "wildpark"],
    ),
    (
        EventCategory::Wellness,
        &["wellness", "yoga", "meditation", "entspannung", "therme", "achtsamkeit"],
    ),
];

/// Ordered fallback classifier: explicit page tags, then the URL path, then
/// a keyword scan over title and description, else the catch-all category.
pub struct CategoryClassifier;

impl CategoryClassifier {
    pub fn classify(html: &str, url: &str, title: &str, description: &str) -> EventCategory {
        if let Some(category) = Self::from_breadcrumbs(html) {
            return category;
        }
        if let Some(category) = keyword_match(&url.to_lowercase()) {
            return category;
        }
        let haystack = format!("{} {}", title, description).to_lowercase();
        keyword_match(&haystack).unwrap_or(EventCategory::General)
    }

    fn from_breadcrumbs(html: &str) -> Option<EventCategory> {
        let document = Html::parse_document(html);
        let selectors = [".breadcrumb li", ".breadcrumbs a", ".tags a", ".category", ".event-category"];
        for raw in selectors {
            let selector = Selector::parse(raw).unwrap();
            for element in document.select(&selector) {
                let text = element.text().collect::<String>().to_lowercase();
                if let Some(category) = keyword_match(&text) {
                    return Some(category);
                }
            }
        }
        None
    }
}

fn keyword_match(haystack: &str) -> Option<EventCategory> {
    for (category, keywords) in KEYWORDS {
        if keywords.iter().any(|k| haystack.contains(k)) {
            return Some(category);
        }
    }
    None
}
