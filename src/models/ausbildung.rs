use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::job_posting::{JobPosting, NOT_AVAILABLE};

const MAX_STORED_PHONES: usize = 3;
const MAX_DESCRIPTION_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ausbildung {
    pub id: i32,
    pub user_id: String,
    pub url: String,
    pub title: String,
    pub institution: String,
    pub location: String,
    pub start_date: String,
    pub vacancies: String,
    pub description: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub source: String,
    pub requirements: String,
    pub salary: String,
    pub benefits: String,
    pub duration: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AusbildungFilters {
    pub user_id: String,
    pub source: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Column values written for a scraped posting.
#[derive(Debug, Clone, PartialEq)]
pub struct AusbildungRecord {
    pub title: String,
    pub institution: String,
    pub location: String,
    pub start_date: String,
    pub vacancies: String,
    pub description: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub source: String,
    pub requirements: String,
    pub salary: String,
    pub benefits: String,
    pub duration: String,
}

impl From<&JobPosting> for AusbildungRecord {
    fn from(job: &JobPosting) -> Self {
        let or_na = |value: &str| {
            if value.trim().is_empty() {
                NOT_AVAILABLE.to_string()
            } else {
                value.to_string()
            }
        };
        let optional = |value: &Option<String>| {
            value
                .as_deref()
                .map(or_na)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        let phones = job
            .phones
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| (6..=20).contains(&p.chars().count()))
            .take(MAX_STORED_PHONES)
            .collect();

        Self {
            title: job.title.clone(),
            institution: job.institution.clone(),
            location: or_na(&job.location),
            start_date: or_na(&job.start_date),
            vacancies: or_na(&job.vacancies),
            description: or_na(&job.description.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>()),
            emails: job.emails.clone(),
            phones,
            source: job.source.as_str().to_string(),
            requirements: optional(&job.requirements),
            salary: optional(&job.salary),
            benefits: optional(&job.benefits),
            duration: optional(&job.duration),
        }
    }
}

impl Ausbildung {
    pub async fn list(pool: &PgPool, filters: &AusbildungFilters) -> Result<Vec<Ausbildung>, AppError> {
        let per_page = filters.per_page.unwrap_or(50).clamp(1, 200);
        let offset = (filters.page.unwrap_or(1) - 1).max(0) * per_page;

        let rows = sqlx::query_as::<_, Ausbildung>(
            "SELECT * FROM ausbildungen WHERE user_id = $1 AND ($2::text IS NULL OR source = $2) ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        )
        .bind(&filters.user_id)
        .bind(&filters.source)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_by_url_and_user(
        pool: &PgPool,
        url: &str,
        user_id: &str,
    ) -> Result<Option<Ausbildung>, AppError> {
        let row = sqlx::query_as::<_, Ausbildung>(
            "SELECT * FROM ausbildungen WHERE url = $1 AND user_id = $2",
        )
        .bind(url)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn create(
        pool: &PgPool,
        url: &str,
        user_id: &str,
        record: &AusbildungRecord,
    ) -> Result<Ausbildung, AppError> {
        let row = sqlx::query_as::<_, Ausbildung>(
            "INSERT INTO ausbildungen (user_id, url, title, institution, location, start_date, vacancies, description, emails, phones, source, requirements, salary, benefits, duration) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) RETURNING *",
        )
        .bind(user_id)
        .bind(url)
        .bind(&record.title)
        .bind(&record.institution)
        .bind(&record.location)
        .bind(&record.start_date)
        .bind(&record.vacancies)
        .bind(&record.description)
        .bind(&record.emails)
        .bind(&record.phones)
        .bind(&record.source)
        .bind(&record.requirements)
        .bind(&record.salary)
        .bind(&record.benefits)
        .bind(&record.duration)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn update(
        pool: &PgPool,
        url: &str,
        user_id: &str,
        record: &AusbildungRecord,
    ) -> Result<Ausbildung, AppError> {
        sqlx::query_as::<_, Ausbildung>(
            "UPDATE ausbildungen SET title = $3, institution = $4, location = $5, start_date = $6, vacancies = $7, description = $8, emails = $9, phones = $10, source = $11, requirements = $12, salary = $13, benefits = $14, duration = $15, updated_at = NOW() WHERE url = $1 AND user_id = $2 RETURNING *",
        )
        .bind(url)
        .bind(user_id)
        .bind(&record.title)
        .bind(&record.institution)
        .bind(&record.location)
        .bind(&record.start_date)
        .bind(&record.vacancies)
        .bind(&record.description)
        .bind(&record.emails)
        .bind(&record.phones)
        .bind(&record.source)
        .bind(&record.requirements)
        .bind(&record.salary)
        .bind(&record.benefits)
        .bind(&record.duration)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ausbildung {url} not found for user {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job_posting::Site;

    fn posting() -> JobPosting {
        JobPosting {
            title: "Fachinformatiker".into(),
            institution: "Deutsche Bahn".into(),
            location: "".into(),
            start_date: "01.09.2026".into(),
            vacancies: "3".into(),
            description: "x".repeat(2500),
            emails: vec!["karriere@bahn.de".into()],
            phones: vec![
                "030 12345678".into(),
                "12345".into(),
                "+49 151 23456789".into(),
                "0221 555-1234".into(),
                "089 1234567".into(),
            ],
            url: "https://www.ausbildung.de/stellen/x".into(),
            source: Site::Ausbildung,
            requirements: None,
            salary: Some("1.000 EUR".into()),
            benefits: None,
            duration: None,
        }
    }

    #[test]
    fn record_caps_phones_and_description() {
        let record = AusbildungRecord::from(&posting());
        assert_eq!(
            record.phones,
            vec!["030 12345678", "+49 151 23456789", "0221 555-1234"]
        );
        assert_eq!(record.description.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn record_defaults_missing_fields() {
        let record = AusbildungRecord::from(&posting());
        assert_eq!(record.location, NOT_AVAILABLE);
        assert_eq!(record.requirements, NOT_AVAILABLE);
        assert_eq!(record.salary, "1.000 EUR");
        assert_eq!(record.source, "ausbildung");
    }
}
