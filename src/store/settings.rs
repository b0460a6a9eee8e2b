use std::collections::BTreeMap;

use chrono::Utc;
use cidr::Ipv4Inet;
use sqlx::Row;

use super::Store;
use crate::server::error::Error;

/// Recognised settings keys with their defaults.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("scan_network", "192.168.66.0/24"),
    ("scan_ports", "1-10000"),
    ("scan_interval", "60"),
    ("scan_enabled", "true"),
    ("snmp_community", "public"),
    ("deep_discovery_enabled", "true"),
    ("deep_discovery_interval", "360"),
    ("unifi_url", ""),
    ("unifi_token", ""),
];

/// A validated batch of settings writes.
#[derive(Debug, Clone, Default)]
pub struct SettingsBatch(pub BTreeMap<String, String>);

fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn validate_interval(key: &str, value: &str, min: u32, max: u32) -> Result<(), Error> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| Error::Config(format!("{}: '{}' is not an integer", key, value)))?;
    if parsed < min || parsed > max {
        return Err(Error::Config(format!(
            "{}: {} outside {}..{} minutes",
            key, parsed, min, max
        )));
    }
    Ok(())
}

fn validate_bool(key: &str, value: &str) -> Result<(), Error> {
    if value != "true" && value != "false" {
        return Err(Error::Config(format!(
            "{}: expected \"true\" or \"false\", got '{}'",
            key, value
        )));
    }
    Ok(())
}

fn validate_port_range(value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Config("scan_ports: empty".to_string()));
    }
    for part in value.split(',') {
        let part = part.trim();
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (part, part),
        };
        let lo: u32 = lo
            .parse()
            .map_err(|_| Error::Config(format!("scan_ports: bad token '{}'", part)))?;
        let hi: u32 = hi
            .parse()
            .map_err(|_| Error::Config(format!("scan_ports: bad token '{}'", part)))?;
        if lo == 0 || hi == 0 || lo > 65535 || hi > 65535 || lo > hi {
            return Err(Error::Config(format!(
                "scan_ports: '{}' is not a valid port range",
                part
            )));
        }
    }
    Ok(())
}

fn validate_network(value: &str) -> Result<(), Error> {
    // Ipv4Inet tolerates host bits being set (`192.168.66.1/24`).
    let cidr: Ipv4Inet = value
        .parse()
        .map_err(|e| Error::Config(format!("scan_network: '{}': {}", value, e)))?;
    if cidr.network_length() < 8 {
        return Err(Error::Config(format!(
            "scan_network: prefix /{} shorter than /8",
            cidr.network_length()
        )));
    }
    Ok(())
}

/// Validate a single key/value pair. Unknown keys are rejected.
pub fn validate(key: &str, value: &str) -> Result<(), Error> {
    match key {
        "scan_network" => validate_network(value),
        "scan_ports" => validate_port_range(value),
        "scan_interval" => validate_interval(key, value, 1, 1440),
        "deep_discovery_interval" => validate_interval(key, value, 5, 1440),
        "scan_enabled" | "deep_discovery_enabled" => validate_bool(key, value),
        "snmp_community" => {
            if value.split(',').any(|t| !t.trim().is_empty()) {
                Ok(())
            } else {
                Err(Error::Config(
                    "snmp_community: at least one non-empty community required".to_string(),
                ))
            }
        }
        "unifi_url" => {
            if value.is_empty() {
                return Ok(());
            }
            let parsed = url::Url::parse(value)
                .map_err(|e| Error::Config(format!("unifi_url: {}", e)))?;
            match parsed.scheme() {
                "http" | "https" => Ok(()),
                other => Err(Error::Config(format!(
                    "unifi_url: scheme '{}' not allowed",
                    other
                ))),
            }
        }
        "unifi_token" => {
            if value.len() > 200 {
                Err(Error::Config("unifi_token: longer than 200 chars".to_string()))
            } else {
                Ok(())
            }
        }
        _ => Err(Error::Config(format!("unknown setting '{}'", key))),
    }
}

impl Store {
    pub async fn setting(&self, key: &str) -> Result<Option<String>, Error> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Stored value, or the compiled-in default for the key.
    pub async fn setting_or_default(&self, key: &str) -> Result<String, Error> {
        if let Some(value) = self.setting(key).await? {
            return Ok(value);
        }
        default_for(key)
            .map(str::to_string)
            .ok_or_else(|| Error::Config(format!("unknown setting '{}'", key)))
    }

    /// All recognised settings merged over defaults.
    pub async fn all_settings(&self) -> Result<BTreeMap<String, String>, Error> {
        let mut merged: BTreeMap<String, String> = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            merged.insert(row.get("key"), row.get("value"));
        }
        Ok(merged)
    }

    /// Validate the full batch before any write; on any failure nothing changes.
    pub async fn write_settings(&self, batch: &SettingsBatch) -> Result<(), Error> {
        for (key, value) in &batch.0 {
            validate(key, value)?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (key, value) in &batch.0 {
            sqlx::query(
                "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn scan_enabled(&self) -> Result<bool, Error> {
        Ok(self.setting_or_default("scan_enabled").await? == "true")
    }

    pub async fn scan_interval_minutes(&self) -> Result<u32, Error> {
        self.setting_or_default("scan_interval")
            .await?
            .parse()
            .map_err(|_| Error::Config("scan_interval unreadable".to_string()))
    }

    pub async fn deep_discovery_enabled(&self) -> Result<bool, Error> {
        Ok(self.setting_or_default("deep_discovery_enabled").await? == "true")
    }

    pub async fn deep_discovery_interval_minutes(&self) -> Result<u32, Error> {
        self.setting_or_default("deep_discovery_interval")
            .await?
            .parse()
            .map_err(|_| Error::Config("deep_discovery_interval unreadable".to_string()))
    }

    pub async fn snmp_communities(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .setting_or_default("snmp_community")
            .await?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }

    pub async fn unifi_credentials(&self) -> Result<Option<(String, String)>, Error> {
        let url = self.setting_or_default("unifi_url").await?;
        let token = self.setting_or_default("unifi_token").await?;
        if url.is_empty() || token.is_empty() {
            return Ok(None);
        }
        Ok(Some((url, token)))
    }
}
