use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Placeholder for optional fields that could not be resolved.
pub const NOT_AVAILABLE: &str = "N/A";

/// Job portal a posting was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Ausbildung,
    Azubi,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Ausbildung => "ausbildung",
            Site::Azubi => "azubi",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ausbildung" => Ok(Site::Ausbildung),
            "azubi" => Ok(Site::Azubi),
            other => Err(other.to_string()),
        }
    }
}

/// A single apprenticeship posting as extracted from a detail page.
///
/// Built fresh for every detail-page visit. The extra fields
/// (`requirements`, `salary`, `benefits`, `duration`) are `None` for
/// portals whose adapter does not define selectors for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPosting {
    pub title: String,
    pub institution: String,
    pub location: String,
    pub start_date: String,
    pub vacancies: String,
    pub description: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub url: String,
    pub source: Site,
    pub requirements: Option<String>,
    pub salary: Option<String>,
    pub benefits: Option<String>,
    pub duration: Option<String>,
}

impl JobPosting {
    pub fn has_contact_email(&self) -> bool {
        !self.emails.is_empty()
    }

    /// Whether the free-text start date mentions the given year.
    pub fn starts_in(&self, year: i32) -> bool {
        self.start_date.contains(&year.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_parses_case_insensitively() {
        assert_eq!("Azubi".parse::<Site>(), Ok(Site::Azubi));
        assert_eq!(" ausbildung ".parse::<Site>(), Ok(Site::Ausbildung));
        assert_eq!("stepstone".parse::<Site>(), Err("stepstone".to_string()));
    }

    #[test]
    fn start_year_matches_date_token() {
        let posting = JobPosting {
            title: "Kaufmann".into(),
            institution: "Firma".into(),
            location: NOT_AVAILABLE.into(),
            start_date: "01.08.2026".into(),
            vacancies: NOT_AVAILABLE.into(),
            description: NOT_AVAILABLE.into(),
            emails: vec![],
            phones: vec![],
            url: "https://www.ausbildung.de/stellen/x".into(),
            source: Site::Ausbildung,
            requirements: None,
            salary: None,
            benefits: None,
            duration: None,
        };
        assert!(posting.starts_in(2026));
        assert!(!posting.starts_in(2025));
        assert!(!posting.has_contact_email());
    }
}
