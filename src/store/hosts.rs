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
pub enum HostStatus {
    Up,
    Down,
    Unknown,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Up => "up",
            HostStatus::Down => "down",
            HostStatus::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "up" => HostStatus::Up,
            "down" => HostStatus::Down,
            _ => HostStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxCredentials {
    pub api_host: String,
    pub token_id: String,
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FritzboxCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// A discovered IPv4 endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Host {
    pub id: Uuid,
    pub ip: String,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub os_guess: Option<String>,
    pub status: HostStatus,
    /// Operator-forced device type; `None` means "let the classifier decide".
    pub device_type: Option<String>,
    pub parent_host_id: Option<Uuid>,
    /// Last result of each discovery evidence source, keyed by method name.
    pub discovery_info: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub proxmox: Option<ProxmoxCredentials>,
    #[serde(skip_serializing)]
    pub fritzbox: Option<FritzboxCredentials>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn has_proxmox_credentials(&self) -> bool {
        self.proxmox.is_some()
    }

    pub fn has_fritzbox_credentials(&self) -> bool {
        self.fritzbox.is_some()
    }
}

/// What one scan observed about a host. Empty/absent fields never erase
/// previously stored values.
#[derive(Debug, Clone, Default)]
pub struct HostObservation {
    pub ip: String,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub os_guess: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| strip_nul(v.trim()))
        .filter(|v| !v.is_empty())
}

fn from_row(row: &SqliteRow) -> Result<Host, Error> {
    let id: String = row.get("id");
    let parent: Option<String> = row.get("parent_host_id");
    let discovery_info: Option<String> = row.get("discovery_info");

    let proxmox = match (
        row.get::<Option<String>, _>("proxmox_api_host"),
        row.get::<Option<String>, _>("proxmox_token_id"),
        row.get::<Option<String>, _>("proxmox_token_secret"),
    ) {
        (Some(api_host), Some(token_id), Some(token_secret)) => Some(ProxmoxCredentials {
            api_host,
            token_id,
            token_secret,
        }),
        _ => None,
    };

    let fritzbox = match (
        row.get::<Option<String>, _>("fritzbox_host"),
        row.get::<Option<String>, _>("fritzbox_username"),
        row.get::<Option<String>, _>("fritzbox_password"),
    ) {
        (Some(host), Some(username), Some(password)) => Some(FritzboxCredentials {
            host,
            username,
            password,
        }),
        _ => None,
    };

    Ok(Host {
        id: Uuid::parse_str(&id).map_err(|e| Error::Parse(format!("host id: {}", e)))?,
        ip: row.get("ip"),
        hostname: row.get("hostname"),
        mac: row.get("mac"),
        vendor: row.get("vendor"),
        os_guess: row.get("os_guess"),
        status: HostStatus::parse(row.get::<String, _>("status").as_str()),
        device_type: row.get("device_type"),
        parent_host_id: parent
            .map(|p| Uuid::parse_str(&p))
            .transpose()
            .map_err(|e| Error::Parse(format!("parent host id: {}", e)))?,
        discovery_info: discovery_info
            .map(|d| serde_json::from_str(&d))
            .transpose()?,
        proxmox,
        fritzbox,
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    /// Insert or merge one scan observation. Re-observation sets `status='up'`,
    /// bumps `last_seen`, preserves `first_seen` and keeps any stored field the
    /// observation left empty.
    pub async fn upsert_host(&self, obs: &HostObservation, now: DateTime<Utc>) -> Result<Host, Error> {
        let hostname = non_empty(obs.hostname.clone());
        let mac = non_empty(obs.mac.clone()).map(|m| m.to_lowercase());
        let vendor = non_empty(obs.vendor.clone());
        let os_guess = non_empty(obs.os_guess.clone());

        sqlx::query(
            "INSERT INTO hosts (id, ip, hostname, mac, vendor, os_guess, status, first_seen, last_seen, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'up', ?, ?, ?)
             ON CONFLICT(ip) DO UPDATE SET
                 hostname   = COALESCE(excluded.hostname, hosts.hostname),
                 mac        = COALESCE(excluded.mac, hosts.mac),
                 vendor     = COALESCE(excluded.vendor, hosts.vendor),
                 os_guess   = COALESCE(excluded.os_guess, hosts.os_guess),
                 status     = 'up',
                 last_seen  = excluded.last_seen,
                 updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&obs.ip)
        .bind(&hostname)
        .bind(&mac)
        .bind(&vendor)
        .bind(&os_guess)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.host_by_ip(&obs.ip)
            .await?
            .ok_or_else(|| Error::NotFound(format!("host {}", obs.ip)))
    }

    pub async fn host_by_id(&self, id: &Uuid) -> Result<Option<Host>, Error> {
        let row = sqlx::query("SELECT * FROM hosts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn host_by_ip(&self, ip: &str) -> Result<Option<Host>, Error> {
        let row = sqlx::query("SELECT * FROM hosts WHERE ip = ?")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn host_by_mac(&self, mac: &str) -> Result<Option<Host>, Error> {
        let row = sqlx::query("SELECT * FROM hosts WHERE mac = ?")
            .bind(mac.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn all_hosts(&self) -> Result<Vec<Host>, Error> {
        let rows = sqlx::query("SELECT * FROM hosts ORDER BY ip")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// Cascades to services and availability samples; children keep existing
    /// but lose their parent reference (FK `ON DELETE SET NULL`).
    pub async fn delete_host(&self, id: &Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_host_up(&self, id: &Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE hosts SET status = 'up', last_seen = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition to `down` only when the host has not been seen since `cutoff`.
    /// Returns whether the transition happened.
    pub async fn mark_host_down_graceful(
        &self,
        id: &Uuid,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE hosts SET status = 'down', updated_at = ?
             WHERE id = ? AND status <> 'down' AND last_seen < ?",
        )
        .bind(now)
        .bind(id.to_string())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the operator device-type override.
    pub async fn set_device_type(
        &self,
        id: &Uuid,
        device_type: Option<&str>,
    ) -> Result<(), Error> {
        let result = sqlx::query("UPDATE hosts SET device_type = ?, updated_at = ? WHERE id = ?")
            .bind(device_type)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("host {}", id)));
        }
        Ok(())
    }

    pub async fn set_proxmox_credentials(
        &self,
        id: &Uuid,
        creds: Option<&ProxmoxCredentials>,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE hosts SET proxmox_api_host = ?, proxmox_token_id = ?, proxmox_token_secret = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(creds.map(|c| c.api_host.clone()))
        .bind(creds.map(|c| c.token_id.clone()))
        .bind(creds.map(|c| c.token_secret.clone()))
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("host {}", id)));
        }
        Ok(())
    }

    pub async fn set_fritzbox_credentials(
        &self,
        id: &Uuid,
        creds: Option<&FritzboxCredentials>,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE hosts SET fritzbox_host = ?, fritzbox_username = ?, fritzbox_password = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(creds.map(|c| c.host.clone()))
        .bind(creds.map(|c| c.username.clone()))
        .bind(creds.map(|c| c.password.clone()))
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("host {}", id)));
        }
        Ok(())
    }

    pub async fn hosts_with_proxmox_credentials(&self) -> Result<Vec<Host>, Error> {
        let rows = sqlx::query(
            "SELECT * FROM hosts
             WHERE proxmox_api_host IS NOT NULL AND proxmox_token_id IS NOT NULL AND proxmox_token_secret IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn hosts_with_fritzbox_credentials(&self) -> Result<Vec<Host>, Error> {
        let rows = sqlx::query(
            "SELECT * FROM hosts
             WHERE fritzbox_host IS NOT NULL AND fritzbox_username IS NOT NULL AND fritzbox_password IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(from_row).collect()
    }

    /// Atomically replace all auto-discovered parent links.
    ///
    /// Clears `parent_host_id` on every row without a manual device type,
    /// then assigns the resolved parents. Children with a manual device type
    /// are left untouched, as is any self-referencing assignment.
    pub async fn replace_auto_parents(
        &self,
        assignments: &[(Uuid, Uuid)],
    ) -> Result<usize, Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE hosts SET parent_host_id = NULL, updated_at = ?
             WHERE parent_host_id IS NOT NULL AND device_type IS NULL",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut applied = 0;
        for (child, parent) in assignments {
            if child == parent {
                continue;
            }
            let result = sqlx::query(
                "UPDATE hosts SET parent_host_id = ?, updated_at = ?
                 WHERE id = ? AND device_type IS NULL",
            )
            .bind(parent.to_string())
            .bind(now)
            .bind(child.to_string())
            .execute(&mut *tx)
            .await?;
            applied += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// Write the merged per-method enrichment map for one host.
    pub async fn set_discovery_info(
        &self,
        id: &Uuid,
        info: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE hosts SET discovery_info = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(info)?)
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn obs(ip: &str) -> HostObservation {
        HostObservation {
            ip: ip.to_string(),
            hostname: Some("gw.local".to_string()),
            mac: Some("AA:BB:CC:00:11:22".to_string()),
            vendor: Some("AVM".to_string()),
            os_guess: None,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen_and_merges_empty() {
        let store = Store::in_memory().await.unwrap();
        let t0 = Utc::now();
        let created = store.upsert_host(&obs("192.168.1.1"), t0).await.unwrap();
        assert_eq!(created.status, HostStatus::Up);
        assert_eq!(created.mac.as_deref(), Some("aa:bb:cc:00:11:22"));

        // Second observation with empty fields must not erase anything.
        let t1 = t0 + Duration::minutes(5);
        let sparse = HostObservation {
            ip: "192.168.1.1".to_string(),
            hostname: Some("".to_string()),
            ..Default::default()
        };
        let merged = store.upsert_host(&sparse, t1).await.unwrap();
        assert_eq!(merged.id, created.id);
        assert_eq!(merged.hostname.as_deref(), Some("gw.local"));
        assert_eq!(merged.vendor.as_deref(), Some("AVM"));
        assert_eq!(merged.first_seen, created.first_seen);
        assert!(merged.last_seen > created.last_seen);
    }

    #[tokio::test]
    async fn down_transition_respects_grace() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        let host = store.upsert_host(&obs("10.0.0.5"), now).await.unwrap();

        // Seen 30 minutes ago: cutoff of now-2h does not retire it.
        let cutoff = now - Duration::hours(2);
        assert!(
            !store
                .mark_host_down_graceful(&host.id, cutoff, now)
                .await
                .unwrap()
        );
        assert_eq!(
            store.host_by_id(&host.id).await.unwrap().unwrap().status,
            HostStatus::Up
        );

        // Three hours later the same cutoff logic retires it.
        let later = now + Duration::hours(3);
        assert!(
            store
                .mark_host_down_graceful(&host.id, later - Duration::hours(2), later)
                .await
                .unwrap()
        );
        assert_eq!(
            store.host_by_id(&host.id).await.unwrap().unwrap().status,
            HostStatus::Down
        );
    }

    #[tokio::test]
    async fn replace_auto_parents_skips_manual_device_type() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        let parent = store.upsert_host(&obs("10.0.0.1"), now).await.unwrap();
        let auto_child = store.upsert_host(&obs("10.0.0.2"), now).await.unwrap();
        let manual_child = store.upsert_host(&obs("10.0.0.3"), now).await.unwrap();

        store
            .set_device_type(&manual_child.id, Some("server"))
            .await
            .unwrap();

        // First application sets both candidates; the manual one is refused.
        let applied = store
            .replace_auto_parents(&[(auto_child.id, parent.id), (manual_child.id, parent.id)])
            .await
            .unwrap();
        assert_eq!(applied, 1);

        let auto = store.host_by_id(&auto_child.id).await.unwrap().unwrap();
        assert_eq!(auto.parent_host_id, Some(parent.id));
        let manual = store.host_by_id(&manual_child.id).await.unwrap().unwrap();
        assert_eq!(manual.parent_host_id, None);

        // Idempotent on a stable input.
        let applied_again = store
            .replace_auto_parents(&[(auto_child.id, parent.id), (manual_child.id, parent.id)])
            .await
            .unwrap();
        assert_eq!(applied_again, 1);
        let auto = store.host_by_id(&auto_child.id).await.unwrap().unwrap();
        assert_eq!(auto.parent_host_id, Some(parent.id));
    }

    #[tokio::test]
    async fn delete_cascades_and_nulls_children() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        let parent = store.upsert_host(&obs("10.0.1.1"), now).await.unwrap();
        let child = store.upsert_host(&obs("10.0.1.2"), now).await.unwrap();
        store
            .replace_auto_parents(&[(child.id, parent.id)])
            .await
            .unwrap();

        assert!(store.delete_host(&parent.id).await.unwrap());
        let orphan = store.host_by_id(&child.id).await.unwrap().unwrap();
        assert_eq!(orphan.parent_host_id, None);
    }

    #[tokio::test]
    async fn credentials_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let host = store
            .upsert_host(&obs("10.0.2.1"), Utc::now())
            .await
            .unwrap();

        store
            .set_proxmox_credentials(
                &host.id,
                Some(&ProxmoxCredentials {
                    api_host: "https://10.0.2.1:8006".to_string(),
                    token_id: "root@pam!catalog".to_string(),
                    token_secret: "s3cret".to_string(),
                }),
            )
            .await
            .unwrap();

        let with_creds = store.hosts_with_proxmox_credentials().await.unwrap();
        assert_eq!(with_creds.len(), 1);
        assert!(with_creds[0].has_proxmox_credentials());
        assert!(store.hosts_with_fritzbox_credentials().await.unwrap().is_empty());
    }
}
