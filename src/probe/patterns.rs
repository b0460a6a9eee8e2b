//! Known-application body indicators.
//!
//! Lowercase substrings looked up in fetched HTML; first table hit wins, so
//! the more specific token of two related products comes first.

/// One known application: body indicator, display name, icon slug.
#[derive(Debug, PartialEq, Eq)]
pub struct AppPattern {
    pub indicator: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
}

macro_rules! app {
    ($indicator:literal, $name:literal, $icon:literal) => {
        AppPattern {
            indicator: $indicator,
            name: $name,
            icon: $icon,
        }
    };
}

pub const KNOWN_APPS: &[AppPattern] = &[
    // Dashboards & monitoring
    app!("grafana", "Grafana", "grafana"),
    app!("prometheus", "Prometheus", "prometheus"),
    app!("alertmanager", "Alertmanager", "prometheus"),
    app!("uptime kuma", "Uptime Kuma", "uptime-kuma"),
    app!("uptime-kuma", "Uptime Kuma", "uptime-kuma"),
    app!("zabbix", "Zabbix", "zabbix"),
    app!("netdata", "Netdata", "netdata"),
    app!("librenms", "LibreNMS", "librenms"),
    app!("checkmk", "Checkmk", "checkmk"),
    app!("graylog", "Graylog", "graylog"),
    app!("kibana", "Kibana", "kibana"),
    app!("gatus", "Gatus", "gatus"),
    app!("homarr", "Homarr", "homarr"),
    app!("homepage", "Homepage", "homepage"),
    app!("heimdall", "Heimdall", "heimdall"),
    app!("dashy", "Dashy", "dashy"),
    app!("tautulli", "Tautulli", "tautulli"),
    app!("jellystat", "Jellystat", "jellystat"),
    // Virtualisation & infrastructure
    app!("proxmox", "Proxmox VE", "proxmox"),
    app!("pve-manager", "Proxmox VE", "proxmox"),
    app!("esxi", "VMware ESXi", "vmware"),
    app!("vcenter", "VMware vCenter", "vmware"),
    app!("unraid", "Unraid", "unraid"),
    app!("rancher", "Rancher", "rancher"),
    app!("portainer", "Portainer", "portainer"),
    app!("kubernetes dashboard", "Kubernetes Dashboard", "kubernetes"),
    app!("cockpit", "Cockpit", "cockpit"),
    app!("webmin", "Webmin", "webmin"),
    // NAS & storage
    app!("synology", "Synology DSM", "synology"),
    app!("diskstation", "Synology DSM", "synology"),
    app!("qnap", "QNAP QTS", "qnap"),
    app!("truenas", "TrueNAS", "truenas"),
    app!("freenas", "TrueNAS", "truenas"),
    app!("openmediavault", "OpenMediaVault", "openmediavault"),
    app!("nextcloud", "Nextcloud", "nextcloud"),
    app!("owncloud", "ownCloud", "owncloud"),
    app!("seafile", "Seafile", "seafile"),
    app!("filebrowser", "File Browser", "filebrowser"),
    app!("syncthing", "Syncthing", "syncthing"),
    app!("duplicati", "Duplicati", "duplicati"),
    app!("minio", "MinIO", "minio"),
    // Network gear & routers
    app!("fritz!box", "FRITZ!Box", "avm"),
    app!("fritzbox", "FRITZ!Box", "avm"),
    app!("openwrt", "OpenWrt", "openwrt"),
    app!("luci", "OpenWrt", "openwrt"),
    app!("pfsense", "pfSense", "pfsense"),
    app!("opnsense", "OPNsense", "opnsense"),
    app!("mikrotik", "MikroTik RouterOS", "mikrotik"),
    app!("routeros", "MikroTik RouterOS", "mikrotik"),
    app!("unifi network", "UniFi Network", "unifi"),
    app!("ubiquiti", "Ubiquiti", "ubiquiti"),
    app!("edgeos", "EdgeOS", "ubiquiti"),
    app!("uisp", "UISP", "ubiquiti"),
    app!("airos", "Ubiquiti airOS", "ubiquiti"),
    app!("tp-link", "TP-Link", "tp-link"),
    app!("netgear", "NETGEAR", "netgear"),
    app!("zyxel", "Zyxel", "zyxel"),
    app!("draytek", "DrayTek", "draytek"),
    app!("sophos", "Sophos", "sophos"),
    app!("fortigate", "FortiGate", "fortinet"),
    // DNS & ad blocking
    app!("pi-hole", "Pi-hole", "pi-hole"),
    app!("pihole", "Pi-hole", "pi-hole"),
    app!("adguard home", "AdGuard Home", "adguard-home"),
    app!("technitium", "Technitium DNS", "technitium"),
    app!("powerdns", "PowerDNS", "powerdns"),
    app!("unbound", "Unbound", "unbound"),
    // Proxies & ingress
    app!("nginx proxy manager", "Nginx Proxy Manager", "nginx-proxy-manager"),
    app!("traefik", "Traefik", "traefik"),
    app!("caddy", "Caddy", "caddy"),
    app!("haproxy", "HAProxy", "haproxy"),
    app!("cloudflared", "cloudflared", "cloudflare"),
    app!("wg-easy", "WireGuard Easy", "wireguard"),
    app!("wireguard", "WireGuard", "wireguard"),
    app!("openvpn", "OpenVPN", "openvpn"),
    // Home automation & IoT
    app!("home assistant", "Home Assistant", "home-assistant"),
    app!("homeassistant", "Home Assistant", "home-assistant"),
    app!("esphome", "ESPHome", "esphome"),
    app!("tasmota", "Tasmota", "tasmota"),
    app!("shelly", "Shelly", "shelly"),
    app!("zigbee2mqtt", "Zigbee2MQTT", "zigbee2mqtt"),
    app!("node-red", "Node-RED", "node-red"),
    app!("openhab", "openHAB", "openhab"),
    app!("iobroker", "ioBroker", "iobroker"),
    app!("octoprint", "OctoPrint", "octoprint"),
    app!("philips hue", "Philips Hue Bridge", "philips-hue"),
    // Media
    app!("jellyfin", "Jellyfin", "jellyfin"),
    app!("jellyseerr", "Jellyseerr", "jellyseerr"),
    app!("overseerr", "Overseerr", "overseerr"),
    app!("plex", "Plex", "plex"),
    app!("emby", "Emby", "emby"),
    app!("audiobookshelf", "Audiobookshelf", "audiobookshelf"),
    app!("navidrome", "Navidrome", "navidrome"),
    app!("komga", "Komga", "komga"),
    app!("kavita", "Kavita", "kavita"),
    app!("immich", "Immich", "immich"),
    app!("photoprism", "PhotoPrism", "photoprism"),
    app!("sonarr", "Sonarr", "sonarr"),
    app!("radarr", "Radarr", "radarr"),
    app!("lidarr", "Lidarr", "lidarr"),
    app!("bazarr", "Bazarr", "bazarr"),
    app!("prowlarr", "Prowlarr", "prowlarr"),
    app!("jackett", "Jackett", "jackett"),
    app!("sabnzbd", "SABnzbd", "sabnzbd"),
    app!("qbittorrent", "qBittorrent", "qbittorrent"),
    app!("transmission", "Transmission", "transmission"),
    app!("deluge", "Deluge", "deluge"),
    app!("autobrr", "autobrr", "autobrr"),
    // Developer & ops tools
    app!("gitlab", "GitLab", "gitlab"),
    app!("gitea", "Gitea", "gitea"),
    app!("forgejo", "Forgejo", "forgejo"),
    app!("jenkins", "Jenkins", "jenkins"),
    app!("drone ci", "Drone CI", "drone"),
    app!("argocd", "Argo CD", "argo-cd"),
    app!("argo cd", "Argo CD", "argo-cd"),
    app!("sonarqube", "SonarQube", "sonarqube"),
    app!("harbor", "Harbor", "harbor"),
    app!("code-server", "code-server", "code-server"),
    // Identity & secrets
    app!("keycloak", "Keycloak", "keycloak"),
    app!("authelia", "Authelia", "authelia"),
    app!("authentik", "authentik", "authentik"),
    app!("pocket id", "Pocket ID", "pocket-id"),
    app!("vaultwarden", "Vaultwarden", "vaultwarden"),
    app!("bitwarden", "Bitwarden", "bitwarden"),
    // Applications & misc
    app!("wordpress", "WordPress", "wordpress"),
    app!("wp-content", "WordPress", "wordpress"),
    app!("grocy", "Grocy", "grocy"),
    app!("mealie", "Mealie", "mealie"),
    app!("paperless-ngx", "Paperless-ngx", "paperless-ngx"),
    app!("paperless", "Paperless-ngx", "paperless-ngx"),
    app!("bookstack", "BookStack", "bookstack"),
    app!("wiki.js", "Wiki.js", "wikijs"),
    app!("dokuwiki", "DokuWiki", "dokuwiki"),
    app!("phpmyadmin", "phpMyAdmin", "phpmyadmin"),
    app!("adminer", "Adminer", "adminer"),
    app!("roundcube", "Roundcube", "roundcube"),
    app!("memos", "Memos", "memos"),
    app!("linkstack", "LinkStack", "linkstack"),
    app!("karakeep", "Karakeep", "karakeep"),
    app!("lubelogger", "LubeLogger", "lubelogger"),
    app!("open webui", "Open WebUI", "open-webui"),
    app!("open-webui", "Open WebUI", "open-webui"),
    app!("stable diffusion", "Stable Diffusion WebUI", "stable-diffusion"),
    app!("netbootxyz", "netboot.xyz", "netbootxyz"),
    app!("netboot.xyz", "netboot.xyz", "netbootxyz"),
    // Printers & UPS
    app!("cups", "CUPS", "cups"),
    app!("peanut", "PeaNUT", "nut"),
    app!("network ups tools", "Network UPS Tools", "nut"),
];

/// First known application whose indicator occurs in the (lowercased) body.
pub fn match_body(body_lower: &str) -> Option<&'static AppPattern> {
    KNOWN_APPS
        .iter()
        .find(|app| body_lower.contains(app.indicator))
}

/// All matching applications in table order, deduplicated by name.
pub fn match_all(body_lower: &str) -> Vec<&'static AppPattern> {
    let mut seen = Vec::new();
    for app in KNOWN_APPS {
        if body_lower.contains(app.indicator) && !seen.iter().any(|s: &&AppPattern| s.name == app.name) {
            seen.push(app);
        }
    }
    seen
}
