//! Acceptance checks and field sanitizing for scraped postings.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::models::job_posting::{JobPosting, NOT_AVAILABLE};
use crate::scraping::text::{collapse_whitespace, is_valid_email};

pub const DEFAULT_MAX_LENGTH: usize = 255;
pub const DESCRIPTION_MAX_LENGTH: usize = 1000;

const ELLIPSIS: &str = "...";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Strip markup, collapse whitespace and cap the length at `max_length` chars.
///
/// The ellipsis counts toward the cap, so sanitizing twice changes nothing.
/// A `max_length` of zero disables the cap.
pub fn sanitize_string(s: &str, max_length: usize) -> String {
    let stripped = TAG_RE.replace_all(s, "");
    let sanitized = collapse_whitespace(&stripped);

    if max_length == 0 || sanitized.chars().count() <= max_length {
        return sanitized;
    }

    let keep = max_length.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = sanitized.chars().take(keep).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str(ELLIPSIS);
    truncated
}

pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url).is_ok()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check the fields a posting cannot be stored without.
///
/// Location, dates and contacts are optional here; a missing email is a
/// business-rule rejection handled by the runner.
pub fn validate_job_data(job: &JobPosting) -> ValidationReport {
    let mut errors = Vec::new();
    if job.title.trim().is_empty() {
        errors.push("Title is required".to_string());
    }
    if job.institution.trim().is_empty() {
        errors.push("Institution is required".to_string());
    }
    if !is_valid_url(&job.url) {
        errors.push("Valid URL is required".to_string());
    }
    ValidationReport { errors }
}

fn sanitize_or_na(value: &str, max_length: usize) -> String {
    let sanitized = sanitize_string(value, max_length);
    if sanitized.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        sanitized
    }
}

pub fn sanitize_job_data(job: JobPosting) -> JobPosting {
    let optional = |value: Option<String>| value.map(|v| sanitize_or_na(&v, DEFAULT_MAX_LENGTH));

    JobPosting {
        title: sanitize_or_na(&job.title, DEFAULT_MAX_LENGTH),
        institution: sanitize_or_na(&job.institution, DEFAULT_MAX_LENGTH),
        location: sanitize_or_na(&job.location, DEFAULT_MAX_LENGTH),
        start_date: sanitize_or_na(&job.start_date, DEFAULT_MAX_LENGTH),
        vacancies: sanitize_or_na(&job.vacancies, DEFAULT_MAX_LENGTH),
        description: sanitize_or_na(&job.description, DESCRIPTION_MAX_LENGTH),
        emails: job.emails.into_iter().filter(|e| is_valid_email(e)).collect(),
        phones: job.phones,
        url: job.url,
        source: job.source,
        requirements: optional(job.requirements),
        salary: optional(job.salary),
        benefits: optional(job.benefits),
        duration: optional(job.duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job_posting::Site;

    fn posting() -> JobPosting {
        JobPosting {
            title: "  <b>Ausbildung</b>   Kaufmann  ".into(),
            institution: "Deutsche Bahn".into(),
            location: "".into(),
            start_date: "01.09.2026".into(),
            vacancies: "  ".into(),
            description: "d".repeat(1500),
            emails: vec!["karriere@bahn.de".into(), "not-an-email".into(), "x@example.com".into()],
            phones: vec!["030 12345678".into()],
            url: "https://www.ausbildung.de/stellen/kaufmann-bei-deutsche-bahn-in-berlin".into(),
            source: Site::Ausbildung,
            requirements: Some("<li>Abitur</li>".into()),
            salary: Some("".into()),
            benefits: None,
            duration: None,
        }
    }

    #[test]
    fn sanitize_string_strips_and_collapses() {
        assert_eq!(sanitize_string("  <p>Hallo\n\n Welt</p> ", DEFAULT_MAX_LENGTH), "Hallo Welt");
    }

    #[test]
    fn sanitize_string_truncates_with_ellipsis() {
        let out = sanitize_string("abcdefghij", 8);
        assert_eq!(out, "abcde...");
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn sanitize_string_is_idempotent() {
        let inputs = [
            "  leading and trailing  ",
            "<div> Ausbildung <span>zum</span> Bäcker </div>",
            "a < b and c > d",
            "<<a>b>",
            "word ".repeat(80).as_str(),
            "ÄÖÜ ß ".repeat(60).as_str(),
            "x",
            "",
        ]
        .map(str::to_string);

        for input in &inputs {
            for max in [0, 1, 3, 8, 50, DEFAULT_MAX_LENGTH] {
                let once = sanitize_string(input, max);
                assert_eq!(sanitize_string(&once, max), once, "input {input:?} max {max}");
            }
        }
    }

    #[test]
    fn zero_limit_disables_truncation() {
        let long = "z".repeat(600);
        assert_eq!(sanitize_string(&long, 0), long);
    }

    #[test]
    fn validation_requires_title_institution_and_url() {
        let mut job = posting();
        assert!(validate_job_data(&job).is_valid());

        job.title = " ".into();
        job.institution = String::new();
        job.url = "/stellen/relative".into();
        let report = validate_job_data(&job);
        assert!(!report.is_valid());
        assert_eq!(
            report.errors,
            vec!["Title is required", "Institution is required", "Valid URL is required"]
        );
    }

    #[test]
    fn validation_ignores_missing_contacts() {
        let mut job = posting();
        job.emails.clear();
        job.location = NOT_AVAILABLE.into();
        assert!(validate_job_data(&job).is_valid());
    }

    #[test]
    fn sanitize_job_data_defaults_and_filters() {
        let job = sanitize_job_data(posting());
        assert_eq!(job.title, "Ausbildung Kaufmann");
        assert_eq!(job.location, NOT_AVAILABLE);
        assert_eq!(job.vacancies, NOT_AVAILABLE);
        assert_eq!(job.description.chars().count(), DESCRIPTION_MAX_LENGTH);
        assert!(job.description.ends_with("..."));
        assert_eq!(job.emails, vec!["karriere@bahn.de"]);
        assert_eq!(job.phones, vec!["030 12345678"]);
        assert_eq!(job.requirements.as_deref(), Some("Abitur"));
        assert_eq!(job.salary.as_deref(), Some(NOT_AVAILABLE));
        assert_eq!(job.benefits, None);
    }
}
