//! Host classification.
//!
//! A pure function from observations to a device-type label with a
//! confidence and an operator-facing reason (dashboard language is German).
//! Rules run in precedence order; the first that fires wins.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::store::{Host, Service};
use crate::util::strings::mac_oui_prefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Switch,
    Router,
    Firewall,
    #[serde(rename = "ap")]
    AccessPoint,
    Printer,
    Nas,
    Vm,
    Hypervisor,
    Camera,
    Iot,
    Gateway,
    Server,
    Client,
    Device,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Switch => "switch",
            DeviceType::Router => "router",
            DeviceType::Firewall => "firewall",
            DeviceType::AccessPoint => "ap",
            DeviceType::Printer => "printer",
            DeviceType::Nas => "nas",
            DeviceType::Vm => "vm",
            DeviceType::Hypervisor => "hypervisor",
            DeviceType::Camera => "camera",
            DeviceType::Iot => "iot",
            DeviceType::Gateway => "gateway",
            DeviceType::Server => "server",
            DeviceType::Client => "client",
            DeviceType::Device => "device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "switch" => DeviceType::Switch,
            "router" => DeviceType::Router,
            "firewall" => DeviceType::Firewall,
            "ap" => DeviceType::AccessPoint,
            "printer" => DeviceType::Printer,
            "nas" => DeviceType::Nas,
            "vm" => DeviceType::Vm,
            "hypervisor" => DeviceType::Hypervisor,
            "camera" => DeviceType::Camera,
            "iot" => DeviceType::Iot,
            "gateway" => DeviceType::Gateway,
            "server" => DeviceType::Server,
            "client" => DeviceType::Client,
            "device" => DeviceType::Device,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub device_type: String,
    pub confidence: u8,
    pub reason: String,
}

impl Classification {
    fn typed(device_type: DeviceType, confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            device_type: device_type.as_str().to_string(),
            confidence,
            reason: reason.into(),
        }
    }
}

/// MAC OUI prefixes assigned to virtualisation platforms.
const VM_MAC_PREFIXES: &[(&str, &str)] = &[
    ("52:54:00", "QEMU/KVM"),
    ("bc:24:11", "Proxmox VE"),
    ("00:50:56", "VMware"),
    ("00:0c:29", "VMware"),
    ("00:05:69", "VMware"),
    ("08:00:27", "VirtualBox"),
    ("00:15:5d", "Hyper-V"),
    ("00:16:3e", "Xen"),
];

const SYS_DESCR_RULES: &[(&str, DeviceType)] = &[
    ("switch", DeviceType::Switch),
    ("router", DeviceType::Router),
    ("firewall", DeviceType::Firewall),
    ("access point", DeviceType::AccessPoint),
    ("wireless", DeviceType::AccessPoint),
    ("printer", DeviceType::Printer),
    ("diskstation", DeviceType::Nas),
    ("nas", DeviceType::Nas),
];

static OS_RULES: LazyLock<Vec<(Regex, DeviceType, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)esxi|proxmox", DeviceType::Hypervisor, "Hypervisor-Betriebssystem"),
        (r"(?i)windows server", DeviceType::Server, "Windows Server"),
        (r"(?i)pfsense|fortios", DeviceType::Firewall, "Firewall-Betriebssystem"),
        (r"(?i)openwrt|routeros|cisco ios|junos|edgeos", DeviceType::Router, "Router-Betriebssystem"),
        (r"(?i)android|iphone|ipad", DeviceType::Client, "Mobilgerät"),
        (r"(?i)mac os x|macos", DeviceType::Client, "macOS-Gerät"),
        (r"(?i)print server|jetdirect", DeviceType::Printer, "Druckerfirmware"),
    ]
    .into_iter()
    .map(|(pattern, device_type, reason)| {
        (Regex::new(pattern).expect("os regex"), device_type, reason)
    })
    .collect()
});

const SERVER_PORTS: &[u16] = &[22, 80, 443, 3306, 5432, 6379, 27017, 8080, 8443];

fn sys_descr(host: &Host) -> Option<String> {
    let info = host.discovery_info.as_ref()?;
    let snmp = info.get("snmp")?;
    let entry = if snmp.is_array() { snmp.get(0)? } else { snmp };
    entry
        .get("sysDescr")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn observed_ttl(host: &Host) -> Option<i64> {
    let info = host.discovery_info.as_ref()?;
    let ttl = info.get("ttl")?;
    let entry = if ttl.is_array() { ttl.get(0)? } else { ttl };
    entry.get("ttl").and_then(|v| v.as_i64())
}

fn vendor_contains(host: &Host, needles: &[&str]) -> bool {
    host.vendor
        .as_deref()
        .map(|v| {
            let lower = v.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
        .unwrap_or(false)
}

fn open_ports(services: &[Service]) -> Vec<u16> {
    services
        .iter()
        .filter(|s| s.state == crate::store::ServiceState::Open)
        .map(|s| s.port)
        .collect()
}

fn service_text(services: &[Service]) -> String {
    services
        .iter()
        .flat_map(|s| {
            [
                s.product.as_deref().unwrap_or(""),
                s.identified_as.as_deref().unwrap_or(""),
            ]
        })
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify one host from everything the pipeline observed about it.
pub fn classify(host: &Host, services: &[Service]) -> Classification {
    // 1. Operator override is absolute.
    if let Some(manual) = &host.device_type {
        return Classification {
            device_type: manual.clone(),
            confidence: 100,
            reason: "Manuell gesetzt".to_string(),
        };
    }

    // 2. SNMP sysDescr is the most honest self-description a device gives.
    if let Some(descr) = sys_descr(host) {
        let lower = descr.to_lowercase();
        for (needle, device_type) in SYS_DESCR_RULES {
            if lower.contains(needle) {
                return Classification::typed(
                    *device_type,
                    97,
                    format!("SNMP sysDescr enthält '{}'", needle),
                );
            }
        }
    }

    // 3. Virtualisation MAC prefixes.
    if let Some(mac) = &host.mac
        && let Some(prefix) = mac_oui_prefix(mac)
        && let Some((_, platform)) = VM_MAC_PREFIXES.iter().find(|(p, _)| *p == prefix)
    {
        return Classification::typed(
            DeviceType::Vm,
            90,
            format!("MAC-Präfix {} ({})", prefix, platform),
        );
    }

    // 4. OS guess.
    if let Some(os) = &host.os_guess {
        for (re, device_type, reason) in OS_RULES.iter() {
            if re.is_match(os) {
                return Classification::typed(*device_type, 85, *reason);
            }
        }
    }

    // 5. A TTL still at 253..=255 after zero/one hop means network gear.
    if let Some(ttl) = observed_ttl(host)
        && (253..=255).contains(&ttl)
    {
        let (device_type, label) = if vendor_contains(host, &["h3c", "cisco", "hp"]) {
            (DeviceType::Switch, "Switch")
        } else if vendor_contains(host, &["sophos", "fortinet"]) {
            (DeviceType::Firewall, "Firewall")
        } else if vendor_contains(host, &["ubiquiti", "aruba", "ruckus"]) {
            (DeviceType::AccessPoint, "Access Point")
        } else if vendor_contains(host, &["espressif"]) {
            (DeviceType::Iot, "IoT-Gerät")
        } else {
            (DeviceType::Switch, "Netzwerkgerät")
        };
        return Classification::typed(
            device_type,
            70,
            format!("TTL {} deutet auf {}", ttl, label),
        );
    }

    let ports = open_ports(services);
    let services_lower = service_text(services);

    // 6. Telltale services.
    if ports.contains(&8006) || services_lower.contains("proxmox") {
        return Classification::typed(
            DeviceType::Hypervisor,
            80,
            "Proxmox-Weboberfläche erkannt",
        );
    }
    if ports.contains(&554) || services_lower.contains("rtsp") {
        return Classification::typed(DeviceType::Camera, 78, "RTSP-Videostream (Port 554)");
    }
    if ports.contains(&1883) || ports.contains(&8883) {
        return Classification::typed(DeviceType::Iot, 75, "MQTT-Broker erkannt");
    }
    if ports.iter().any(|p| [515, 631, 9100].contains(p)) {
        return Classification::typed(DeviceType::Printer, 80, "Druckerdienste (LPD/IPP/JetDirect)");
    }
    if services_lower.contains("fritz!box") {
        return Classification::typed(DeviceType::Router, 82, "FRITZ!Box-Weboberfläche");
    }
    if services_lower.contains("synology") || services_lower.contains("truenas")
        || services_lower.contains("openmediavault") || services_lower.contains("qnap")
    {
        return Classification::typed(DeviceType::Nas, 80, "NAS-Weboberfläche erkannt");
    }

    // 7. Vendor table. HP is context-sensitive: the OUI covers printers,
    // switches and servers alike.
    if let Some(vendor) = &host.vendor {
        let lower = vendor.to_lowercase();
        if lower.contains("hp") || lower.contains("hewlett") {
            if ports.iter().any(|p| [515, 631, 9100].contains(p)) {
                return Classification::typed(DeviceType::Printer, 75, "HP-Gerät mit Druckerports");
            }
            if ports.contains(&22) && ports.len() <= 3 && observed_ttl(host).unwrap_or(0) >= 253 {
                return Classification::typed(DeviceType::Switch, 70, "HP-Gerät mit Switch-Profil");
            }
            if ports.iter().filter(|p| SERVER_PORTS.contains(p)).count() >= 2 {
                return Classification::typed(DeviceType::Server, 65, "HP-Server");
            }
            // HP alone is no signal; fall through.
        } else {
            let vendor_rules: &[(&[&str], DeviceType, &str)] = &[
                (&["ubiquiti", "aruba", "ruckus"], DeviceType::AccessPoint, "WLAN-Hersteller"),
                (&["cisco", "juniper", "arista", "h3c", "netgear", "zyxel", "d-link", "tp-link"], DeviceType::Switch, "Netzwerk-Hersteller"),
                (&["avm"], DeviceType::Router, "AVM-Gerät"),
                (&["synology", "qnap"], DeviceType::Nas, "NAS-Hersteller"),
                (&["brother", "canon", "epson", "lexmark", "kyocera", "xerox"], DeviceType::Printer, "Drucker-Hersteller"),
                (&["hikvision", "dahua", "axis"], DeviceType::Camera, "Kamera-Hersteller"),
                (&["espressif", "tuya", "sonoff", "shelly"], DeviceType::Iot, "IoT-Hersteller"),
                (&["dell", "supermicro", "fujitsu"], DeviceType::Server, "Server-Hersteller"),
            ];
            for (needles, device_type, label) in vendor_rules {
                if needles.iter().any(|n| lower.contains(n)) {
                    return Classification::typed(
                        *device_type,
                        68,
                        format!("{}: {}", label, vendor),
                    );
                }
            }
        }
    }

    // 8. Several server-typical ports.
    let server_port_count = ports.iter().filter(|p| SERVER_PORTS.contains(p)).count();
    if server_port_count >= 2 {
        return Classification::typed(
            DeviceType::Server,
            60,
            format!("{} Server-Dienste", server_port_count),
        );
    }

    let is_windows = host
        .os_guess
        .as_deref()
        .map(|os| os.to_lowercase().contains("windows"))
        .unwrap_or(false);
    let is_linux = host
        .os_guess
        .as_deref()
        .map(|os| os.to_lowercase().contains("linux"))
        .unwrap_or(false);

    // 9. Windows without server ports is a workstation.
    if is_windows && server_port_count == 0 {
        return Classification::typed(
            DeviceType::Client,
            50,
            "Windows ohne Server-Dienste",
        );
    }

    // 10. A resolver is a server.
    if ports.contains(&53) {
        return Classification::typed(DeviceType::Server, 55, "DNS-Dienst (Port 53)");
    }

    // 11. Lone SSH on Linux.
    if is_linux && ports == vec![22] {
        return Classification::typed(DeviceType::Server, 45, "Nur SSH auf Linux");
    }

    // 12. Nothing conclusive.
    Classification::typed(DeviceType::Device, 10, "Keine eindeutigen Merkmale")
}
