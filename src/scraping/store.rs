use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::ausbildung::{Ausbildung, AusbildungRecord};
use crate::models::job_posting::JobPosting;

/// Where accepted postings end up. Keyed by `(url, user_id)`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_existing(&self, url: &str, user_id: &str) -> Result<Option<Ausbildung>, AppError>;

    async fn create_job(&self, job: &JobPosting, user_id: &str) -> Result<Ausbildung, AppError>;

    async fn update_job(&self, url: &str, user_id: &str, job: &JobPosting) -> Result<Ausbildung, AppError>;

    /// Release the connection at the end of a run.
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// Find-then-create-or-update for one posting.
pub async fn save_posting(
    store: &dyn JobStore,
    job: &JobPosting,
    user_id: &str,
) -> Result<SaveOutcome, AppError> {
    match store.find_existing(&job.url, user_id).await? {
        Some(_) => {
            store.update_job(&job.url, user_id, job).await?;
            Ok(SaveOutcome::Updated)
        }
        None => {
            store.create_job(job, user_id).await?;
            Ok(SaveOutcome::Created)
        }
    }
}

/// Postgres-backed store.
///
/// A shared store borrows the server's pool and leaves it open on close;
/// an owned one (CLI runs) shuts the pool down.
pub struct PgJobStore {
    pool: PgPool,
    owns_pool: bool,
}

impl PgJobStore {
    pub fn shared(pool: PgPool) -> Self {
        Self { pool, owns_pool: false }
    }

    pub fn owned(pool: PgPool) -> Self {
        Self { pool, owns_pool: true }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_existing(&self, url: &str, user_id: &str) -> Result<Option<Ausbildung>, AppError> {
        Ausbildung::find_by_url_and_user(&self.pool, url, user_id).await
    }

    async fn create_job(&self, job: &JobPosting, user_id: &str) -> Result<Ausbildung, AppError> {
        Ausbildung::create(&self.pool, &job.url, user_id, &AusbildungRecord::from(job)).await
    }

    async fn update_job(&self, url: &str, user_id: &str, job: &JobPosting) -> Result<Ausbildung, AppError> {
        Ausbildung::update(&self.pool, url, user_id, &AusbildungRecord::from(job)).await
    }

    async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
            tracing::debug!("Database pool closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;

    use super::*;

    /// Vec-backed store for runner tests. URLs in `failing` make writes fail.
    #[derive(Default)]
    pub struct MemoryJobStore {
        rows: Mutex<Vec<Ausbildung>>,
        failing: HashSet<String>,
        closed: AtomicBool,
    }

    impl MemoryJobStore {
        pub fn failing_on(urls: &[&str]) -> Self {
            Self {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn rows(&self) -> Vec<Ausbildung> {
            self.rows.lock().unwrap().clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn row(id: i32, url: &str, user_id: &str, job: &JobPosting) -> Ausbildung {
            let record = AusbildungRecord::from(job);
            let now = Utc::now();
            Ausbildung {
                id,
                user_id: user_id.to_string(),
                url: url.to_string(),
                title: record.title,
                institution: record.institution,
                location: record.location,
                start_date: record.start_date,
                vacancies: record.vacancies,
                description: record.description,
                emails: record.emails,
                phones: record.phones,
                source: record.source,
                requirements: record.requirements,
                salary: record.salary,
                benefits: record.benefits,
                duration: record.duration,
                created_at: now,
                updated_at: now,
            }
        }

        fn check(&self, url: &str) -> Result<(), AppError> {
            if self.failing.contains(url) {
                return Err(AppError::Internal(format!("write rejected for {url}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn find_existing(&self, url: &str, user_id: &str) -> Result<Option<Ausbildung>, AppError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().find(|r| r.url == url && r.user_id == user_id).cloned())
        }

        async fn create_job(&self, job: &JobPosting, user_id: &str) -> Result<Ausbildung, AppError> {
            self.check(&job.url)?;
            let mut rows = self.rows.lock().unwrap();
            let row = Self::row(rows.len() as i32 + 1, &job.url, user_id, job);
            rows.push(row.clone());
            Ok(row)
        }

        async fn update_job(&self, url: &str, user_id: &str, job: &JobPosting) -> Result<Ausbildung, AppError> {
            self.check(url)?;
            let mut rows = self.rows.lock().unwrap();
            let existing = rows
                .iter_mut()
                .find(|r| r.url == url && r.user_id == user_id)
                .ok_or_else(|| AppError::NotFound(url.to_string()))?;
            *existing = Self::row(existing.id, url, user_id, job);
            Ok(existing.clone())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryJobStore;
    use super::*;
    use crate::models::job_posting::Site;

    fn posting(title: &str) -> JobPosting {
        JobPosting {
            title: title.into(),
            institution: "Gasthof Post".into(),
            location: "Berlin".into(),
            start_date: "01.09.2026".into(),
            vacancies: "1".into(),
            description: "Kochen".into(),
            emails: vec!["info@gasthof-post.de".into()],
            phones: vec![],
            url: "https://www.azubi.de/ausbildungsplatz/koch-p-1".into(),
            source: Site::Azubi,
            requirements: None,
            salary: None,
            benefits: None,
            duration: None,
        }
    }

    #[tokio::test]
    async fn second_save_updates_same_row() {
        let store = MemoryJobStore::default();
        assert_eq!(save_posting(&store, &posting("Koch"), "u1").await.unwrap(), SaveOutcome::Created);
        assert_eq!(save_posting(&store, &posting("Koch (m/w/d)"), "u1").await.unwrap(), SaveOutcome::Updated);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Koch (m/w/d)");
        assert_eq!(rows[0].requirements, "N/A");
    }

    #[tokio::test]
    async fn same_url_is_separate_per_user() {
        let store = MemoryJobStore::default();
        save_posting(&store, &posting("Koch"), "u1").await.unwrap();
        assert_eq!(save_posting(&store, &posting("Koch"), "u2").await.unwrap(), SaveOutcome::Created);
        assert_eq!(store.rows().len(), 2);
    }
}
