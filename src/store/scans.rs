use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::Store;
use crate::server::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => ScanStatus::Completed,
            "error" => ScanStatus::Error,
            _ => ScanStatus::Running,
        }
    }
}

/// One run of the scan pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub id: Uuid,
    pub network: String,
    pub status: ScanStatus,
    pub hosts_found: i64,
    pub services_found: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

fn from_row(row: &SqliteRow) -> Result<Scan, Error> {
    Ok(Scan {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| Error::Parse(format!("scan id: {}", e)))?,
        network: row.get("network"),
        status: ScanStatus::parse(row.get::<String, _>("status").as_str()),
        hosts_found: row.get("hosts_found"),
        services_found: row.get("services_found"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error: row.get("error"),
    })
}

impl Store {
    pub async fn create_scan(&self, network: &str) -> Result<Scan, Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO scans (id, network, status, started_at) VALUES (?, ?, 'running', ?)",
        )
        .bind(id.to_string())
        .bind(network)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.scan_by_id(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scan {}", id)))
    }

    /// `running -> completed`. A row that already left `running` is not touched.
    pub async fn complete_scan(
        &self,
        id: &Uuid,
        hosts_found: usize,
        services_found: usize,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE scans SET status = 'completed', hosts_found = ?, services_found = ?, finished_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(hosts_found as i64)
        .bind(services_found as i64)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `running -> error`.
    pub async fn fail_scan(&self, id: &Uuid, error: &str) -> Result<(), Error> {
        sqlx::query(
            "UPDATE scans SET status = 'error', error = ?, finished_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Startup recovery: any scan left `running` by a previous process is an error.
    pub async fn fail_interrupted_scans(&self) -> Result<usize, Error> {
        let result = sqlx::query(
            "UPDATE scans SET status = 'error', error = 'server restarted', finished_at = ?
             WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn scan_by_id(&self, id: &Uuid) -> Result<Option<Scan>, Error> {
        let row = sqlx::query("SELECT * FROM scans WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn recent_scans(&self, limit: i64) -> Result<Vec<Scan>, Error> {
        let rows = sqlx::query("SELECT * FROM scans ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn latest_scan(&self) -> Result<Option<Scan>, Error> {
        let row = sqlx::query("SELECT * FROM scans ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions_exactly_once() {
        let store = Store::in_memory().await.unwrap();
        let scan = store.create_scan("192.168.66.0/24").await.unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        assert!(scan.finished_at.is_none());

        store.complete_scan(&scan.id, 5, 12).await.unwrap();
        let done = store.scan_by_id(&scan.id).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert_eq!(done.hosts_found, 5);
        assert!(done.finished_at.is_some());

        // A second transition attempt must not rewrite the row.
        store.fail_scan(&scan.id, "late failure").await.unwrap();
        let still_done = store.scan_by_id(&scan.id).await.unwrap().unwrap();
        assert_eq!(still_done.status, ScanStatus::Completed);
        assert!(still_done.error.is_none());
    }

    #[tokio::test]
    async fn interrupted_scans_become_errors_on_startup() {
        let store = Store::in_memory().await.unwrap();
        let scan = store.create_scan("10.0.0.0/24").await.unwrap();

        let recovered = store.fail_interrupted_scans().await.unwrap();
        assert_eq!(recovered, 1);

        let row = store.scan_by_id(&scan.id).await.unwrap().unwrap();
        assert_eq!(row.status, ScanStatus::Error);
        assert_eq!(row.error.as_deref(), Some("server restarted"));
    }
}
