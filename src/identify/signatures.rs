//! Signature tables for the layered service identifier.

use std::sync::LazyLock;

use regex::Regex;

fn table(entries: &[(&'static str, &'static str)]) -> Vec<(Regex, &'static str)> {
    entries
        .iter()
        .map(|(pattern, name)| (Regex::new(pattern).expect("signature regex"), *name))
        .collect()
}

/// Page-title signatures. Hit order follows the table.
static TITLE_SIGNATURES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    table(&[
        (r"(?i)grafana", "Grafana"),
        (r"(?i)proxmox", "Proxmox VE"),
        (r"(?i)fritz!?box", "FRITZ!Box"),
        (r"(?i)pi-?hole", "Pi-hole"),
        (r"(?i)adguard home", "AdGuard Home"),
        (r"(?i)home assistant", "Home Assistant"),
        (r"(?i)jellyfin", "Jellyfin"),
        (r"(?i)^plex$|plex media server", "Plex"),
        (r"(?i)synology|diskstation", "Synology DSM"),
        (r"(?i)truenas|freenas", "TrueNAS"),
        (r"(?i)openmediavault", "OpenMediaVault"),
        (r"(?i)qnap|qts", "QNAP QTS"),
        (r"(?i)openwrt|luci", "OpenWrt"),
        (r"(?i)pfsense", "pfSense"),
        (r"(?i)opnsense", "OPNsense"),
        (r"(?i)mikrotik|routeros", "MikroTik RouterOS"),
        (r"(?i)unifi", "UniFi Network"),
        (r"(?i)portainer", "Portainer"),
        (r"(?i)uptime kuma", "Uptime Kuma"),
        (r"(?i)nginx proxy manager", "Nginx Proxy Manager"),
        (r"(?i)vaultwarden", "Vaultwarden"),
        (r"(?i)nextcloud", "Nextcloud"),
        (r"(?i)gitlab", "GitLab"),
        (r"(?i)gitea", "Gitea"),
        (r"(?i)jenkins", "Jenkins"),
        (r"(?i)keycloak", "Keycloak"),
        (r"(?i)octoprint", "OctoPrint"),
        (r"(?i)sonarr", "Sonarr"),
        (r"(?i)radarr", "Radarr"),
        (r"(?i)prowlarr", "Prowlarr"),
        (r"(?i)overseerr", "Overseerr"),
        (r"(?i)jellyseerr", "Jellyseerr"),
        (r"(?i)immich", "Immich"),
        (r"(?i)paperless", "Paperless-ngx"),
        (r"(?i)phpmyadmin", "phpMyAdmin"),
        (r"(?i)cups", "CUPS"),
        (r"(?i)webmin", "Webmin"),
        (r"(?i)cockpit", "Cockpit"),
        (r"(?i)syncthing", "Syncthing"),
        (r"(?i)zabbix", "Zabbix"),
        (r"(?i)prometheus", "Prometheus"),
    ])
});

/// Server-header signatures: servers that name the application itself.
static SERVER_SIGNATURES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    table(&[
        (r"(?i)plex media server", "Plex"),
        (r"(?i)minio", "MinIO"),
        (r"(?i)jellyfin", "Jellyfin"),
        (r"(?i)syncthing", "Syncthing"),
        (r"(?i)sabnzbd", "SABnzbd"),
        (r"(?i)couchdb", "CouchDB"),
        (r"(?i)routeros", "MikroTik RouterOS"),
        (r"(?i)mikrotik", "MikroTik RouterOS"),
        (r"(?i)tasmota", "Tasmota"),
        (r"(?i)esphome", "ESPHome"),
        (r"(?i)unifi", "UniFi Network"),
        (r"(?i)prometheus", "Prometheus"),
        (r"(?i)grafana", "Grafana"),
        (r"(?i)pve-api-daemon|pveproxy", "Proxmox VE"),
        (r"(?i)fritz!?box", "FRITZ!Box"),
        (r"(?i)mini_httpd", "Embedded Web Server"),
        (r"(?i)gose?rver|gosund", "IoT Web Interface"),
    ])
});

/// Session-cookie signatures.
static COOKIE_SIGNATURES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    table(&[
        (r"PVEAuthCookie", "Proxmox VE"),
        (r"grafana_session", "Grafana"),
        (r"(?i)pihole", "Pi-hole"),
        (r"i_like_gitea", "Gitea"),
        (r"(?i)wordpress_", "WordPress"),
        (r"oc_sessionPassphrase|(?i)nc_session", "Nextcloud"),
        (r"sabnzbd_", "SABnzbd"),
        (r"authelia_session", "Authelia"),
        (r"authentik_session", "authentik"),
        (r"immich_", "Immich"),
        (r"unifises|TOKEN=ey", "UniFi Network"),
        (r"AIROS_", "Ubiquiti airOS"),
    ])
});

/// Generic web-server recognition for the fallthrough layer.
static GENERIC_SERVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(nginx|apache|lighttpd)(?:[/ ]([\w.\-]+))?").unwrap());

/// Well-known TCP port fallbacks.
pub const PORT_FALLBACK: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (111, "RPC"),
    (123, "NTP"),
    (135, "MS RPC"),
    (139, "NetBIOS"),
    (143, "IMAP"),
    (161, "SNMP"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (515, "LPD Printer"),
    (548, "AFP"),
    (554, "RTSP"),
    (587, "SMTP Submission"),
    (631, "IPP Printer"),
    (636, "LDAPS"),
    (873, "rsync"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1433, "MS SQL"),
    (1883, "MQTT"),
    (2049, "NFS"),
    (3000, "Web App"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5060, "SIP"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8080, "HTTP Proxy"),
    (8443, "HTTPS Alt"),
    (9100, "JetDirect Printer"),
    (11211, "Memcached"),
    (27017, "MongoDB"),
];

pub fn match_title(title: &str) -> Option<&'static str> {
    TITLE_SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(title))
        .map(|(_, name)| *name)
}

pub fn match_server(server: &str) -> Option<&'static str> {
    SERVER_SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(server))
        .map(|(_, name)| *name)
}

pub fn match_cookies(cookies: &str) -> Option<&'static str> {
    COOKIE_SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(cookies))
        .map(|(_, name)| *name)
}

/// `(name, version)` when the Server header is a plain nginx/apache/lighttpd.
pub fn match_generic_server(server: &str) -> Option<(&'static str, Option<String>)> {
    let caps = GENERIC_SERVER_RE.captures(server)?;
    let name = match caps[1].to_lowercase().as_str() {
        "nginx" => "nginx",
        "apache" => "Apache httpd",
        "lighttpd" => "lighttpd",
        _ => return None,
    };
    Some((name, caps.get(2).map(|v| v.as_str().to_string())))
}

pub fn port_fallback(port: u16) -> Option<&'static str> {
    PORT_FALLBACK
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_signatures_hit() {
        assert_eq!(match_title("Grafana"), Some("Grafana"));
        assert_eq!(match_title("FRITZ!Box 7590"), Some("FRITZ!Box"));
        assert_eq!(match_title("Just a blog"), None);
    }

    #[test]
    fn generic_server_parses_version() {
        let (name, version) = match_generic_server("nginx/1.25.3").unwrap();
        assert_eq!(name, "nginx");
        assert_eq!(version.as_deref(), Some("1.25.3"));

        let (name, version) = match_generic_server("Apache/2.4.62 (Debian)").unwrap();
        assert_eq!(name, "Apache httpd");
        assert_eq!(version.as_deref(), Some("2.4.62"));

        assert!(match_generic_server("Caddy").is_none());
    }

    #[test]
    fn cookie_signatures_hit() {
        assert_eq!(
            match_cookies("PVEAuthCookie=abc; path=/"),
            Some("Proxmox VE")
        );
        assert_eq!(match_cookies("sessionid=xyz"), None);
    }

    #[test]
    fn port_fallback_covers_well_known() {
        assert_eq!(port_fallback(22), Some("SSH"));
        assert_eq!(port_fallback(631), Some("IPP Printer"));
        assert_eq!(port_fallback(49152), None);
    }
}
