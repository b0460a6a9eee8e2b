use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::{HostStatus, Store};
use crate::server::error::Error;

/// Append-only availability sample. Samples older than 30 days are pruned.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilitySample {
    pub host_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub status: HostStatus,
}

impl Store {
    /// Insert one sample per host, all sharing the same `checked_at` so one
    /// scan produces one aligned column of samples.
    pub async fn insert_availability_samples(
        &self,
        samples: &[(Uuid, HostStatus)],
        checked_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for (host_id, status) in samples {
            sqlx::query("INSERT INTO availability (host_id, checked_at, status) VALUES (?, ?, ?)")
                .bind(host_id.to_string())
                .bind(checked_at)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn availability_for_host(
        &self,
        host_id: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySample>, Error> {
        let rows = sqlx::query(
            "SELECT host_id, checked_at, status FROM availability
             WHERE host_id = ? AND checked_at >= ? ORDER BY checked_at DESC",
        )
        .bind(host_id.to_string())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AvailabilitySample {
                    host_id: Uuid::parse_str(&row.get::<String, _>("host_id"))
                        .map_err(|e| Error::Parse(format!("sample host id: {}", e)))?,
                    checked_at: row.get("checked_at"),
                    status: if row.get::<String, _>("status") == "up" {
                        HostStatus::Up
                    } else {
                        HostStatus::Down
                    },
                })
            })
            .collect()
    }

    pub async fn prune_availability_before(&self, cutoff: DateTime<Utc>) -> Result<usize, Error> {
        let result = sqlx::query("DELETE FROM availability WHERE checked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HostObservation;
    use chrono::Duration;

    #[tokio::test]
    async fn samples_share_checked_at_and_old_ones_are_pruned() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        let a = store
            .upsert_host(
                &HostObservation {
                    ip: "10.2.0.1".to_string(),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        let b = store
            .upsert_host(
                &HostObservation {
                    ip: "10.2.0.2".to_string(),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        let old = now - Duration::days(40);
        store
            .insert_availability_samples(&[(a.id, HostStatus::Up)], old)
            .await
            .unwrap();
        store
            .insert_availability_samples(
                &[(a.id, HostStatus::Up), (b.id, HostStatus::Down)],
                now,
            )
            .await
            .unwrap();

        let pruned = store
            .prune_availability_before(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(pruned, 1);

        let samples = store
            .availability_for_host(&a.id, now - Duration::days(31))
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].checked_at, now);

        let b_samples = store
            .availability_for_host(&b.id, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(b_samples[0].status, HostStatus::Down);
        assert_eq!(b_samples[0].checked_at, samples[0].checked_at);
    }
}
