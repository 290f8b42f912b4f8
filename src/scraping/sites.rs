//! Per-portal configuration driving the generic extractor.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::models::job_posting::Site;
use crate::scraping::error::ScrapeError;

/// Characters that encodeURIComponent does NOT encode.
/// RFC 3986 unreserved: A-Z a-z 0-9 - _ . ! ~ * ' ( )
const ENCODE_URI_COMPONENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// How the institution name is resolved on a detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstitutionRule {
    /// Drop a leading "bei " from the match, falling back to the
    /// `bei-<name>-in-` slug of the posting URL.
    StripBeiWithSlugFallback,
    /// First selector match, no fallback.
    Direct,
}

/// Fallback chain for the start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDateRule {
    /// Selectors, then `dt`/`dd` labels, then full-text date patterns.
    SelectorsLabelsAndText,
    /// Selectors, then `dt`/`dd` labels.
    SelectorsAndLabels,
}

/// Ordered CSS selector candidates per field. An empty list means the
/// portal does not expose that field.
#[derive(Debug)]
pub struct FieldSelectors {
    pub title: &'static [&'static str],
    pub institution: &'static [&'static str],
    pub location: &'static [&'static str],
    pub start_date: &'static [&'static str],
    pub vacancies: &'static [&'static str],
    pub requirements: &'static [&'static str],
    pub salary: &'static [&'static str],
    pub benefits: &'static [&'static str],
    pub duration: &'static [&'static str],
}

#[derive(Debug)]
pub struct SiteAdapter {
    pub site: Site,
    pub base_url: &'static str,
    pub job_link_selector: &'static str,
    pub selectors: FieldSelectors,
    pub institution_rule: InstitutionRule,
    pub start_date_rule: StartDateRule,
    /// Scan elements mentioning contact keywords when no email was found.
    pub scan_contact_sections: bool,
}

static AUSBILDUNG: SiteAdapter = SiteAdapter {
    site: Site::Ausbildung,
    base_url: "https://www.ausbildung.de/suche",
    job_link_selector: "a[href^='/stellen/']",
    selectors: FieldSelectors {
        title: &["h1"],
        institution: &[
            "h4[data-testid=\"jp-customer\"]",
            ".company-name",
            "[itemprop=\"hiringOrganization\"]",
        ],
        location: &[
            "[data-testid=\"jp-branches\"]",
            ".company-address",
            ".job-location",
            "[class*=\"location\"]",
            "[class*=\"address\"]",
            "[class*=\"standort\"]",
        ],
        start_date: &[
            "[data-testid=\"jp-starting-at\"]",
            ".jp-starting-at",
            ".start-date",
            "[class*=\"start\"]",
            "[class*=\"begin\"]",
        ],
        vacancies: &[
            "[data-testid=\"jp-vacancies\"]",
            ".vacancies",
            ".job-vacancies",
            "[class*=\"platz\"]",
            "[class*=\"vacan\"]",
        ],
        requirements: &[],
        salary: &[],
        benefits: &[],
        duration: &[],
    },
    institution_rule: InstitutionRule::StripBeiWithSlugFallback,
    start_date_rule: StartDateRule::SelectorsLabelsAndText,
    scan_contact_sections: false,
};

static AZUBI: SiteAdapter = SiteAdapter {
    site: Site::Azubi,
    base_url: "https://www.azubi.de/ausbildungsplatz",
    job_link_selector: "a[href*=\"/ausbildungsplatz/\"][href*=\"-p-\"]",
    selectors: FieldSelectors {
        title: &["h1", "[data-testid=\"job-title\"]", ".job-title", ".ausbildung-title"],
        institution: &[
            "[data-cy=\"company-name\"]",
            ".company-name",
            "[data-testid=\"company-name\"]",
            ".employer-name",
            "h2",
            ".firma",
            "strong",
        ],
        location: &[
            "[data-cy=\"address\"]",
            ".job-location",
            "[data-cy=\"location\"]",
            ".address",
            ".ort",
            ".standort",
        ],
        start_date: &[".start-date", "[data-cy=\"start-date\"]", ".ausbildungsbeginn", ".beginn"],
        vacancies: &[".vacancies", "[data-cy=\"vacancies\"]", ".available-positions", ".freie-plaetze"],
        requirements: &[".requirements", "[data-cy=\"requirements\"]", ".voraussetzungen", ".anforderungen"],
        salary: &[".salary", "[data-cy=\"salary\"]", ".gehalt", ".vergütung", ".ausbildungsvergütung"],
        benefits: &[".benefits", ".leistungen", ".vorteile"],
        duration: &[".duration", ".dauer", ".ausbildungsdauer"],
    },
    institution_rule: InstitutionRule::Direct,
    start_date_rule: StartDateRule::SelectorsAndLabels,
    scan_contact_sections: true,
};

/// Resolve a portal name to its adapter.
pub fn get_adapter(name: &str) -> Result<&'static SiteAdapter, ScrapeError> {
    name.parse::<Site>()
        .map(adapter_for)
        .map_err(|_| ScrapeError::UnknownSite(name.to_string()))
}

pub fn adapter_for(site: Site) -> &'static SiteAdapter {
    match site {
        Site::Ausbildung => &AUSBILDUNG,
        Site::Azubi => &AZUBI,
    }
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, ENCODE_URI_COMPONENT_SET).to_string()
}

impl SiteAdapter {
    /// Build the search-results URL for a 1-based page number.
    pub fn search_url(&self, term: &str, location: &str, page: u32) -> String {
        let term = encode_component(term.trim());
        let location = encode_component(location.trim());
        match self.site {
            Site::Ausbildung => format!(
                "{}?search={term}%7C{location}&radius=500&page={page}",
                self.base_url
            ),
            Site::Azubi if page > 1 => {
                format!("{}?text={term}&ort={location}&page={page}", self.base_url)
            }
            Site::Azubi => format!("{}?text={term}&ort={location}", self.base_url),
        }
    }

    pub fn has_extra_fields(&self) -> bool {
        !self.selectors.requirements.is_empty()
    }
}
