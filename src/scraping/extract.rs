//! Turning a loaded detail page into a [`JobPosting`].
//!
//! Everything here is synchronous: a parsed [`Html`] is not `Send`, so a
//! document is built, queried and dropped between two awaits.

use std::collections::HashSet;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::models::job_posting::{JobPosting, NOT_AVAILABLE};
use crate::scraping::navigator::LoadedPage;
use crate::scraping::sites::{InstitutionRule, SiteAdapter, StartDateRule};
use crate::scraping::text::{
    HIDDEN_ELEMENTS, clean_html, collapse_whitespace, extract_emails, extract_phone_numbers, rendered_text,
    truncate_text,
};
use crate::scraping::validation::{DEFAULT_MAX_LENGTH, sanitize_string};

const DESCRIPTION_CHARS: usize = 1500;
const CONTACT_SECTION_MAX_CHARS: usize = 500;

const LOCATION_LABELS: &[&str] = &["Standort", "Standorte", "Ort", "Adresse"];
const START_DATE_LABELS: &[&str] = &["Beginn", "Ausbildungsbeginn", "Start", "Startdatum"];
const VACANCY_LABELS: &[&str] = &["Freie Plätze", "Plätze", "Anzahl", "Stellen"];
const REQUIREMENT_LABELS: &[&str] = &["Voraussetzungen", "Anforderungen", "Qualifikationen", "Requirements"];
const SALARY_LABELS: &[&str] = &["Gehalt", "Vergütung", "Ausbildungsvergütung", "Lohn"];
const BENEFIT_LABELS: &[&str] = &["Leistungen", "Vorteile", "Benefits"];
const DURATION_LABELS: &[&str] = &["Dauer", "Ausbildungsdauer", "Duration"];

static INSTITUTION_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bei-(.*?)-in-").expect("valid slug regex"));

static START_DATE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)(?:beginn|start|ab)\s*:?\s*(\d{1,2}\.\d{1,2}\.(?:\d{4}|\d{2}))"),
        Regex::new(r"(?i)ausbildungsbeginn\s*:?\s*(\d{1,2}\.\d{1,2}\.(?:\d{4}|\d{2}))"),
        Regex::new(r"\b(\d{1,2}\.\d{1,2}\.20\d{2})\b"),
    ]
    .map(|re| re.expect("valid start date regex"))
});

static VACANCIES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:freie?\s*)?(?:plätze?|stellen?)").expect("valid vacancies regex")
});
static REQUIREMENTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:voraussetzungen?|anforderungen?|qualifikationen?)[:\-]?\s*([^.]{20,200})")
        .expect("valid requirements regex")
});
static SALARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:gehalt|vergütung|lohn)[:\-]?\s*([^.]{10,100})").expect("valid salary regex")
});
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:dauer|ausbildungsdauer)[:\-]?\s*([^.]{5,50})").expect("valid duration regex")
});
static CONTACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)e-mail|email|kontakt|beratung@|info@").expect("valid contact regex")
});

static DT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dt").expect("valid dt selector"));
static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));
static ANY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body *").expect("valid selector"));

/// A parsed page plus the URL it was loaded from.
pub struct PageDocument {
    url: Url,
    html: Html,
}

impl PageDocument {
    pub fn parse(page: &LoadedPage) -> Self {
        Self {
            url: page.url.clone(),
            html: Html::parse_document(&page.html),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Trimmed text content of the first element matching `selector`.
    ///
    /// An unparsable selector is treated like a miss.
    pub fn select_first_text(&self, selector: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        let element = self.html.select(&selector).next()?;
        let text = element.text().collect::<String>();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Text of the `dd` following the first `dt` containing `label`,
    /// compared case-insensitively.
    pub fn label_text(&self, label: &str) -> Option<String> {
        let needle = label.to_lowercase();
        self.html
            .select(&DT_SELECTOR)
            .filter(|dt| dt.text().collect::<String>().to_lowercase().contains(&needle))
            .find_map(|dt| {
                let dd = dt
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|sibling| sibling.value().name() == "dd")?;
                let text = dd.text().collect::<String>();
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            })
    }

    /// Selectors first, then `dt`/`dd` labels. Values come back sanitized.
    pub fn find_field(&self, selectors: &[&str], labels: &[&str], field_name: &str) -> Option<String> {
        let by_selector = selectors.iter().find_map(|selector| {
            self.select_first_text(selector)
                .map(|text| sanitize_string(&text, DEFAULT_MAX_LENGTH))
                .filter(|text| !text.is_empty())
        });
        if by_selector.is_some() {
            return by_selector;
        }

        let by_label = labels.iter().find_map(|label| {
            self.label_text(label)
                .map(|text| sanitize_string(&text, DEFAULT_MAX_LENGTH))
                .filter(|text| !text.is_empty())
        });
        if by_label.is_some() {
            tracing::debug!("Found {field_name} via label");
        }
        by_label
    }

    /// Like [`find_field`](Self::find_field) but resolves a miss to `"N/A"`.
    pub fn extract_field(&self, selectors: &[&str], labels: &[&str], field_name: &str) -> String {
        self.find_field(selectors, labels, field_name)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Rendered text of `<body>`, skipping script-like elements.
    pub fn visible_text(&self) -> String {
        self.html
            .select(&BODY_SELECTOR)
            .next()
            .map(|body| collapse_whitespace(&rendered_text(body)))
            .unwrap_or_default()
    }

    /// Absolute, de-duplicated targets of every link matching `selector`,
    /// in document order.
    pub fn links(&self, selector: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.html
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.url.join(href.trim()).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(String::from)
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Text of small elements that look like contact blocks.
    fn contact_sections(&self) -> String {
        self.html
            .select(&ANY_SELECTOR)
            .filter(|el| !HIDDEN_ELEMENTS.contains(&el.value().name()))
            .map(|el| el.text().collect::<String>())
            .filter(|text| text.chars().count() <= CONTACT_SECTION_MAX_CHARS && CONTACT_RE.is_match(text))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `"Ausbildung bei Deutsche Bahn"` style URLs carry the employer in the slug.
fn institution_from_slug(url: &Url) -> Option<String> {
    let decoded = percent_decode_str(url.as_str()).decode_utf8_lossy();
    let slug = INSTITUTION_SLUG_RE.captures(&decoded)?.get(1)?.as_str().to_string();
    let name = slug
        .split('-')
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn strip_bei_prefix(text: &str) -> &str {
    match text.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bei ") => text[4..].trim_start(),
        _ => text,
    }
}

fn resolve_institution(doc: &PageDocument, adapter: &SiteAdapter) -> String {
    let selectors = adapter.selectors.institution;
    match adapter.institution_rule {
        InstitutionRule::Direct => doc.find_field(selectors, &[], "institution").unwrap_or_default(),
        InstitutionRule::StripBeiWithSlugFallback => {
            let matched = selectors.iter().find_map(|selector| {
                let text = doc.select_first_text(selector)?;
                let name = sanitize_string(strip_bei_prefix(&text), DEFAULT_MAX_LENGTH);
                (!name.is_empty()).then_some(name)
            });
            match matched {
                Some(name) if name.chars().count() >= 2 => name,
                _ => institution_from_slug(doc.url()).unwrap_or_default(),
            }
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let value = re.captures(text)?.get(1)?.as_str().trim().to_string();
    let value = sanitize_string(&value, DEFAULT_MAX_LENGTH);
    (!value.is_empty()).then_some(value)
}

fn resolve_start_date(doc: &PageDocument, adapter: &SiteAdapter, text: &str) -> String {
    if let Some(date) = doc.find_field(adapter.selectors.start_date, START_DATE_LABELS, "start date") {
        return date;
    }
    if adapter.start_date_rule == StartDateRule::SelectorsLabelsAndText
        && let Some(date) = START_DATE_PATTERNS.iter().find_map(|re| first_capture(re, text))
    {
        tracing::debug!("Found start date in page text: {date}");
        return date;
    }
    NOT_AVAILABLE.to_string()
}

fn resolve_vacancies(doc: &PageDocument, adapter: &SiteAdapter, text: &str) -> String {
    doc.find_field(adapter.selectors.vacancies, VACANCY_LABELS, "vacancies")
        .or_else(|| {
            VACANCIES_RE
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Optional portal-specific field: selectors, labels, then a text pattern.
fn extra_field(
    doc: &PageDocument,
    selectors: &[&str],
    labels: &[&str],
    pattern: Option<&Regex>,
    text: &str,
    field_name: &str,
) -> String {
    doc.find_field(selectors, labels, field_name)
        .or_else(|| pattern.and_then(|re| first_capture(re, text)))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn collect_emails(page: &LoadedPage, doc: &PageDocument, adapter: &SiteAdapter, visible: &str) -> Vec<String> {
    let emails = extract_emails(&page.html);
    if !emails.is_empty() {
        return emails;
    }
    let emails = extract_emails(visible);
    if !emails.is_empty() || !adapter.scan_contact_sections {
        return emails;
    }
    extract_emails(&doc.contact_sections())
}

/// Pull every field the adapter knows about from a detail page.
///
/// Missing title or institution come back empty so validation rejects the
/// posting; every other miss resolves to `"N/A"`.
pub fn extract_posting(page: &LoadedPage, adapter: &SiteAdapter) -> JobPosting {
    let doc = PageDocument::parse(page);
    let selectors = &adapter.selectors;
    let visible = doc.visible_text();
    let cleaned = clean_html(&page.html);

    let title = doc.find_field(selectors.title, &[], "title").unwrap_or_default();
    let institution = resolve_institution(&doc, adapter);
    let location = doc.extract_field(selectors.location, LOCATION_LABELS, "location");
    let start_date = resolve_start_date(&doc, adapter, &visible);
    let vacancies = resolve_vacancies(&doc, adapter, &visible);
    let emails = collect_emails(page, &doc, adapter, &visible);
    let phones = extract_phone_numbers(&cleaned);

    let (requirements, salary, benefits, duration) = if adapter.has_extra_fields() {
        (
            Some(extra_field(&doc, selectors.requirements, REQUIREMENT_LABELS, Some(&*REQUIREMENTS_RE), &visible, "requirements")),
            Some(extra_field(&doc, selectors.salary, SALARY_LABELS, Some(&*SALARY_RE), &visible, "salary")),
            Some(extra_field(&doc, selectors.benefits, BENEFIT_LABELS, None, &visible, "benefits")),
            Some(extra_field(&doc, selectors.duration, DURATION_LABELS, Some(&*DURATION_RE), &visible, "duration")),
        )
    } else {
        (None, None, None, None)
    };

    JobPosting {
        title,
        institution,
        location,
        start_date,
        vacancies,
        description: truncate_text(&cleaned, DESCRIPTION_CHARS),
        emails,
        phones,
        url: page.url.to_string(),
        source: adapter.site,
        requirements,
        salary,
        benefits,
        duration,
    }
}
