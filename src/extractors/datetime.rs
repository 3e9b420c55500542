use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Outcome of date extraction for one page or one text fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateExtraction {
    /// Distinct resolved dates, sorted ascending. More than one entry makes
    /// the assembler explode the event into one occurrence per date.
    pub dates: Vec<NaiveDateTime>,
    /// Explicit end timestamp when the page states one (structured data only).
    pub end_date: Option<NaiveDateTime>,
    /// Recurring-weekday phrasing was found but no concrete date could be
    /// resolved; the caller decides whether to skip or schedule separately.
    pub is_recurring: bool,
}

impl DateExtraction {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

static DMY_RE: Lazy<Regex> = Lazy::new(|| {
    // 24.12.2025, optionally followed by 18:00 or "18 Uhr"
    Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})(?:\D{0,6}?(\d{1,2}):(\d{2})(?:\s*Uhr)?|\D{0,6}?(\d{1,2})\s*Uhr)?").unwrap()
});
static DM_NO_YEAR_RE: Lazy<Regex> =
    // Trailing digits mean a year is present; the caller skips those matches.
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d*)").unwrap());
static D_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2})\.\s*(Januar|Februar|März|Maerz|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember|Jan|Feb|Mär|Mrz|Apr|Aug|Sep|Sept|Okt|Nov|Dez)\.?\s*(\d{4})?").unwrap()
});
static DAY_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    // "12.-14. Juli 2025" or "12. bis 14. Juli"
    Regex::new(r"(?i)(\d{1,2})\.\s*(?:-|–|bis)\s*(\d{1,2})\.\s*(Januar|Februar|März|Maerz|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember|Jan|Feb|Mär|Mrz|Apr|Aug|Sep|Sept|Okt|Nov|Dez)\.?\s*(\d{4})?").unwrap()
});
static NUMERIC_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    // "12.-14.07.2025" / "12. bis 14.07."
    Regex::new(r"(\d{1,2})\.\s*(?:-|–|bis)\s*(\d{1,2})\.(\d{1,2})\.(\d{4})?").unwrap()
});
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:um\s*)?(\d{1,2})(?::(\d{2}))?\s*Uhr").unwrap());
static RECURRING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(jede[nrs]?\s+(Montag|Dienstag|Mittwoch|Donnerstag|Freitag|Samstag|Sonntag|Woche|Tag)|montags|dienstags|mittwochs|donnerstags|freitags|samstags|sonntags|täglich|wöchentlich)").unwrap()
});

fn month_number(name: &str) -> Option<u32> {
    let lowered = name.to_lowercase();
    let month = match lowered.trim_end_matches('.') {
        "januar" | "jan" => 1,
        "februar" | "feb" => 2,
        "märz" | "maerz" | "mär" | "mrz" => 3,
        "april" | "apr" => 4,
        "mai" => 5,
        "juni" | "jun" => 6,
        "juli" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "oktober" | "okt" => 10,
        "november" | "nov" => 11,
        "dezember" | "dez" => 12,
        _ => return None,
    };
    Some(month)
}

/// Multi-strategy date extraction with a fixed trust order: structured
/// markup first, then absolute German dates, ranges, relative words, and
/// finally recurring phrases (which only set a flag).
pub struct DateTimeExtractor {
    grace_window: Duration,
    max_future: Duration,
}

impl DateTimeExtractor {
    pub fn new(grace_window_days: i64, max_future_days: i64) -> Self {
        Self {
            grace_window: Duration::days(grace_window_days),
            max_future: Duration::days(max_future_days),
        }
    }

    /// Extract from a full detail page. Walks the strategy chain over the
    /// document's structured markup first, then its flattened text.
    pub fn extract_from_html(&self, html: &str, now: NaiveDateTime) -> DateExtraction {
        let document = Html::parse_document(html);

        let structured = self.from_structured_markup(&document, now);
        if !structured.is_empty() {
            return structured;
        }

        let text = flatten_text(&document);
        self.extract_from_text(&text, now)
    }

    /// Extract from a bare text fragment (listing-card anchor text).
    pub fn extract_from_text(&self, text: &str, now: NaiveDateTime) -> DateExtraction {
        // Range spans are blanked before the absolute pass so "12.-14. Juli"
        // is never half-eaten as a single "14. Juli", while a standalone
        // absolute date still outranks an incidental range elsewhere.
        let without_ranges = blank_range_spans(text);
        let absolute = self.absolute_dates(&without_ranges, now);
        if !absolute.is_empty() {
            return absolute;
        }

        for strategy in [
            Self::date_ranges,
            Self::day_month_without_year,
            Self::relative_terms,
        ] {
            let extraction = strategy(self, text, now);
            if !extraction.is_empty() {
                return extraction;
            }
        }

        if RECURRING_RE.is_match(text) {
            debug!("Only recurring-weekday phrasing found, no concrete date");
            return DateExtraction {
                is_recurring: true,
                ..Default::default()
            };
        }
        DateExtraction::default()
    }

    /// `<time datetime="...">` attributes and JSON-LD startDate/endDate.
    fn from_structured_markup(&self, document: &Html, now: NaiveDateTime) -> DateExtraction {
        let mut dates = Vec::new();
        let mut end_date = None;

        let time_selector = Selector::parse("time[datetime]").unwrap();
        for element in document.select(&time_selector) {
            if let Some(value) = element.value().attr("datetime") {
                if let Some(parsed) = parse_iso_datetime(value) {
                    dates.push(parsed);
                }
            }
        }

        let ld_selector = Selector::parse("script[type=\"application/ld+json\"]").unwrap();
        for script in document.select(&ld_selector) {
            let raw = script.text().collect::<String>();
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                continue;
            };
            for node in json_ld_nodes(&value) {
                if let Some(start) = node.get("startDate").and_then(|v| v.as_str()) {
                    if let Some(parsed) = parse_iso_datetime(start) {
                        dates.push(parsed);
                    }
                }
                if end_date.is_none() {
                    end_date = node
                        .get("endDate")
                        .and_then(|v| v.as_str())
                        .and_then(parse_iso_datetime);
                }
            }
        }

        DateExtraction {
            dates: self.sanitize(dates, now),
            end_date,
            is_recurring: false,
        }
    }

    /// 24.12.2025 and "24. Dezember 2025", optional trailing time.
    fn absolute_dates(&self, text: &str, now: NaiveDateTime) -> DateExtraction {
        let mut dates = Vec::new();

        for captures in DMY_RE.captures_iter(text) {
            let day: u32 = captures[1].parse().unwrap_or(0);
            let month: u32 = captures[2].parse().unwrap_or(0);
            let year: i32 = captures[3].parse().unwrap_or(0);
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let time = captures
                .get(4)
                .zip(captures.get(5))
                .and_then(|(h, m)| {
                    NaiveTime::from_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, 0)
                })
                .or_else(|| {
                    captures
                        .get(6)
                        .and_then(|h| NaiveTime::from_hms_opt(h.as_str().parse().ok()?, 0, 0))
                })
                .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());
            dates.push(date.and_time(time));
        }

        for captures in D_MONTH_RE.captures_iter(text) {
            let day: u32 = captures[1].parse().unwrap_or(0);
            let Some(month) = month_number(&captures[2]) else {
                continue;
            };
            let year = captures
                .get(3)
                .and_then(|y| y.as_str().parse().ok())
                .unwrap_or_else(|| self.infer_year(day, month, now));
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                let time = trailing_time(text, captures.get(0).unwrap().end());
                dates.push(date.and_time(time));
            }
        }

        DateExtraction {
            dates: self.sanitize(dates, now),
            ..Default::default()
        }
    }

    /// "12.-14. Juli" and "12.-14.07.2025": one date per day in the span.
    fn date_ranges(&self, text: &str, now: NaiveDateTime) -> DateExtraction {
        let mut dates = Vec::new();

        for captures in DAY_RANGE_RE.captures_iter(text) {
            let from: u32 = captures[1].parse().unwrap_or(0);
            let to: u32 = captures[2].parse().unwrap_or(0);
            let Some(month) = month_number(&captures[3]) else {
                continue;
            };
            let year = captures
                .get(4)
                .and_then(|y| y.as_str().parse().ok())
                .unwrap_or_else(|| self.infer_year(from, month, now));
            expand_day_span(&mut dates, from, to, month, year);
        }

        for captures in NUMERIC_RANGE_RE.captures_iter(text) {
            let from: u32 = captures[1].parse().unwrap_or(0);
            let to: u32 = captures[2].parse().unwrap_or(0);
            let month: u32 = captures[3].parse().unwrap_or(0);
            let year = captures
                .get(4)
                .and_then(|y| y.as_str().parse().ok())
                .unwrap_or_else(|| self.infer_year(from, month, now));
            expand_day_span(&mut dates, from, to, month, year);
        }

        DateExtraction {
            dates: self.sanitize(dates, now),
            ..Default::default()
        }
    }

    /// "25.12." with no year: assume the current year, roll forward when
    /// that lands outside the grace window (leftover cards from last season).
    fn day_month_without_year(&self, text: &str, now: NaiveDateTime) -> DateExtraction {
        let mut dates = Vec::new();
        for captures in DM_NO_YEAR_RE.captures_iter(text) {
            if !captures[3].is_empty() {
                // "24.12.2019" carries a year; the absolute pass owns it.
                continue;
            }
            let day: u32 = captures[1].parse().unwrap_or(0);
            let month: u32 = captures[2].parse().unwrap_or(0);
            let year = self.infer_year(day, month, now);
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                let time = trailing_time(text, captures.get(0).unwrap().end());
                dates.push(date.and_time(time));
            }
        }
        DateExtraction {
            dates: self.sanitize(dates, now),
            ..Default::default()
        }
    }

    /// heute / morgen / übermorgen, resolved against the crawl clock.
    fn relative_terms(&self, text: &str, now: NaiveDateTime) -> DateExtraction {
        let lowered = text.to_lowercase();
        let offset = if lowered.contains("übermorgen") {
            Some(2)
        } else if lowered.contains("morgen") {
            Some(1)
        } else if lowered.contains("heute") {
            Some(0)
        } else {
            None
        };

        let Some(offset) = offset else {
            return DateExtraction::default();
        };
        let date = now.date() + Duration::days(offset);
        let time = TIME_RE
            .captures(&lowered)
            .and_then(|c| {
                let hour: u32 = c[1].parse().ok()?;
                let minute: u32 = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
                NaiveTime::from_hms_opt(hour, minute, 0)
            })
            .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        DateExtraction {
            dates: vec![date.and_time(time)],
            ..Default::default()
        }
    }

    fn infer_year(&self, day: u32, month: u32, now: NaiveDateTime) -> i32 {
        let year = now.year();
        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) if date.and_hms_opt(23, 59, 59).unwrap() < now - self.grace_window => {
                year + 1
            }
            _ => year,
        }
    }

    /// Drop implausible values, dedup, sort. Keeping order stable here means
    /// explosion suffixes stay stable between runs.
    fn sanitize(&self, mut dates: Vec<NaiveDateTime>, now: NaiveDateTime) -> Vec<NaiveDateTime> {
        dates.retain(|d| *d >= now - self.grace_window && *d <= now + self.max_future);
        dates.sort();
        dates.dedup_by_key(|d| d.date());
        dates
    }
}

/// Overwrite range spans with same-width whitespace so the absolute-date
/// regexes cannot match inside them.
fn blank_range_spans(text: &str) -> String {
    let mut out = text.to_string();
    for re in [&DAY_RANGE_RE, &NUMERIC_RANGE_RE] {
        loop {
            let Some(range) = re.find(&out).map(|m| m.range()) else {
                break;
            };
            let blank = " ".repeat(range.len());
            out.replace_range(range, &blank);
        }
    }
    out
}

fn expand_day_span(dates: &mut Vec<NaiveDateTime>, from: u32, to: u32, month: u32, year: i32) {
    if from > to || to - from > 31 {
        return;
    }
    for day in from..=to {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            dates.push(date.and_hms_opt(0, 0, 0).unwrap());
        }
    }
}

/// First "HH:MM" or "HH Uhr" shortly after a matched date, else midnight.
fn trailing_time(text: &str, from: usize) -> NaiveTime {
    let window_end = (from + 24).min(text.len());
    // Avoid slicing inside a UTF-8 sequence
    let mut end = window_end;
    while !text.is_char_boundary(end) {
        end += 1;
    }
    let window = &text[from..end];
    TIME_RE
        .captures(window)
        .and_then(|c| {
            let hour: u32 = c[1].parse().ok()?;
            let minute: u32 = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(with_zone) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(with_zone.naive_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(naive);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
}

/// JSON-LD payloads are either one object, an array, or a @graph wrapper.
fn json_ld_nodes(value: &serde_json::Value) -> Vec<&serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Object(map) => match map.get("@graph") {
            Some(serde_json::Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        _ => Vec::new(),
    }
}

fn flatten_text(document: &Html) -> String {
    let body = Selector::parse("body").unwrap();
    match document.select(&body).next() {
        Some(element) => element.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    }
}
