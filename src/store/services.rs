use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::Store;
use crate::server::error::Error;
use crate::util::strings::strip_nul;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Open,
    Closed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Open => "open",
            ServiceState::Closed => "closed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "closed" => ServiceState::Closed,
            _ => ServiceState::Open,
        }
    }
}

/// An open TCP endpoint on a host, keyed by `(host_id, port, protocol)`.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: Uuid,
    pub host_id: Uuid,
    pub port: u16,
    pub protocol: String,
    pub state: ServiceState,
    pub service_name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub info: Option<String>,
    pub banner: Option<String>,
    pub http_title: Option<String>,
    pub http_server: Option<String>,
    pub identified_as: Option<String>,
    pub extra_info: Option<serde_json::Value>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One scan's view of a service. Empty strings preserve the stored value.
#[derive(Debug, Clone, Default)]
pub struct ServiceObservation {
    pub port: u16,
    pub service_name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub info: Option<String>,
    pub banner: Option<String>,
    pub http_title: Option<String>,
    pub http_server: Option<String>,
    pub identified_as: Option<String>,
    pub extra_info: Option<serde_json::Value>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| strip_nul(v.trim()))
        .filter(|v| !v.is_empty())
}

fn from_row(row: &SqliteRow) -> Result<Service, Error> {
    let extra_info: Option<String> = row.get("extra_info");
    Ok(Service {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| Error::Parse(format!("service id: {}", e)))?,
        host_id: Uuid::parse_str(&row.get::<String, _>("host_id"))
            .map_err(|e| Error::Parse(format!("service host id: {}", e)))?,
        port: row.get::<i64, _>("port") as u16,
        protocol: row.get("protocol"),
        state: ServiceState::parse(row.get::<String, _>("state").as_str()),
        service_name: row.get("service_name"),
        product: row.get("product"),
        version: row.get("version"),
        info: row.get("info"),
        banner: row.get("banner"),
        http_title: row.get("http_title"),
        http_server: row.get("http_server"),
        identified_as: row.get("identified_as"),
        extra_info: extra_info.map(|e| serde_json::from_str(&e)).transpose()?,
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
    })
}

impl Store {
    /// Insert or merge one service observation (coalesce-on-empty LWW).
    /// Re-observation reopens a closed row.
    pub async fn upsert_service(
        &self,
        host_id: &Uuid,
        obs: &ServiceObservation,
        now: DateTime<Utc>,
    ) -> Result<Service, Error> {
        let extra_info = obs
            .extra_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO services (id, host_id, port, protocol, state, service_name, product, version, info,
                                   banner, http_title, http_server, identified_as, extra_info, first_seen, last_seen)
             VALUES (?, ?, ?, 'tcp', 'open', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(host_id, port, protocol) DO UPDATE SET
                 state         = 'open',
                 service_name  = COALESCE(excluded.service_name, services.service_name),
                 product       = COALESCE(excluded.product, services.product),
                 version       = COALESCE(excluded.version, services.version),
                 info          = COALESCE(excluded.info, services.info),
                 banner        = COALESCE(excluded.banner, services.banner),
                 http_title    = COALESCE(excluded.http_title, services.http_title),
                 http_server   = COALESCE(excluded.http_server, services.http_server),
                 identified_as = COALESCE(excluded.identified_as, services.identified_as),
                 extra_info    = COALESCE(excluded.extra_info, services.extra_info),
                 last_seen     = excluded.last_seen",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(host_id.to_string())
        .bind(obs.port as i64)
        .bind(non_empty(&obs.service_name))
        .bind(non_empty(&obs.product))
        .bind(non_empty(&obs.version))
        .bind(non_empty(&obs.info))
        .bind(non_empty(&obs.banner))
        .bind(non_empty(&obs.http_title))
        .bind(non_empty(&obs.http_server))
        .bind(non_empty(&obs.identified_as))
        .bind(extra_info)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM services WHERE host_id = ? AND port = ? AND protocol = 'tcp'",
        )
        .bind(host_id.to_string())
        .bind(obs.port as i64)
        .fetch_one(&self.pool)
        .await?;
        from_row(&row)
    }

    pub async fn services_for_host(&self, host_id: &Uuid) -> Result<Vec<Service>, Error> {
        let rows = sqlx::query("SELECT * FROM services WHERE host_id = ? ORDER BY port")
            .bind(host_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// Close open services that this scan did not see, but only those whose
    /// `last_seen` predates `cutoff`. The grace window keeps a single flaky
    /// scan from retiring known services.
    pub async fn mark_services_closed_graceful(
        &self,
        host_id: &Uuid,
        ports_seen: &[u16],
        cutoff: DateTime<Utc>,
    ) -> Result<usize, Error> {
        let placeholders = if ports_seen.is_empty() {
            "SELECT NULL WHERE 0".to_string()
        } else {
            std::iter::repeat_n("?", ports_seen.len())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let sql = format!(
            "UPDATE services SET state = 'closed'
             WHERE host_id = ? AND state = 'open' AND last_seen < ? AND port NOT IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(host_id.to_string()).bind(cutoff);
        for port in ports_seen {
            query = query.bind(*port as i64);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HostObservation;
    use chrono::Duration;

    async fn host(store: &Store, ip: &str) -> Uuid {
        store
            .upsert_host(
                &HostObservation {
                    ip: ip.to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn empty_fields_do_not_overwrite() {
        let store = Store::in_memory().await.unwrap();
        let host_id = host(&store, "10.1.0.1").await;
        let now = Utc::now();

        let first = ServiceObservation {
            port: 80,
            product: Some("nginx".to_string()),
            version: Some("1.25.3".to_string()),
            http_title: Some("Grafana".to_string()),
            ..Default::default()
        };
        store.upsert_service(&host_id, &first, now).await.unwrap();

        let second = ServiceObservation {
            port: 80,
            product: Some("".to_string()),
            version: None,
            http_title: Some("Grafana v11".to_string()),
            ..Default::default()
        };
        let merged = store
            .upsert_service(&host_id, &second, now + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(merged.product.as_deref(), Some("nginx"));
        assert_eq!(merged.version.as_deref(), Some("1.25.3"));
        assert_eq!(merged.http_title.as_deref(), Some("Grafana v11"));
        assert!(merged.last_seen > merged.first_seen);
    }

    #[tokio::test]
    async fn close_respects_grace_and_seen_ports() {
        let store = Store::in_memory().await.unwrap();
        let host_id = host(&store, "10.1.0.2").await;
        let old = Utc::now() - Duration::hours(3);

        store
            .upsert_service(
                &host_id,
                &ServiceObservation {
                    port: 22,
                    ..Default::default()
                },
                old,
            )
            .await
            .unwrap();
        store
            .upsert_service(
                &host_id,
                &ServiceObservation {
                    port: 80,
                    ..Default::default()
                },
                old,
            )
            .await
            .unwrap();
        // Recently seen service inside the grace window.
        store
            .upsert_service(
                &host_id,
                &ServiceObservation {
                    port: 443,
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let cutoff = Utc::now() - Duration::hours(2);
        let closed = store
            .mark_services_closed_graceful(&host_id, &[80], cutoff)
            .await
            .unwrap();
        assert_eq!(closed, 1);

        let services = store.services_for_host(&host_id).await.unwrap();
        let by_port = |p: u16| services.iter().find(|s| s.port == p).unwrap();
        assert_eq!(by_port(22).state, ServiceState::Closed);
        assert_eq!(by_port(80).state, ServiceState::Open);
        assert_eq!(by_port(443).state, ServiceState::Open);
    }

    #[tokio::test]
    async fn reobservation_reopens_closed_service() {
        let store = Store::in_memory().await.unwrap();
        let host_id = host(&store, "10.1.0.3").await;
        let old = Utc::now() - Duration::hours(5);

        store
            .upsert_service(
                &host_id,
                &ServiceObservation {
                    port: 8080,
                    ..Default::default()
                },
                old,
            )
            .await
            .unwrap();
        store
            .mark_services_closed_graceful(&host_id, &[], Utc::now() - Duration::hours(2))
            .await
            .unwrap();

        let reopened = store
            .upsert_service(
                &host_id,
                &ServiceObservation {
                    port: 8080,
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(reopened.state, ServiceState::Open);
    }
}
