//! Raw TCP banner capture and protocol analysis for non-HTTP services.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::util::strings::strip_nul;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const PASSIVE_WAIT: Duration = Duration::from_millis(1500);
pub const MAX_BANNER_BYTES: usize = 2 * 1024;

const SMTP_PORTS: &[u16] = &[25, 465, 587];

#[derive(Debug, Clone, Default)]
pub struct BannerProbe {
    /// NUL-stripped capture, at most 2 KiB.
    pub text: String,
    pub identified: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub http_title: Option<String>,
}

/// Connect, coax a banner out of the service and analyse it.
///
/// SMTP ports get an EHLO; everything else waits passively first and falls
/// back to a minimal HTTP request when the peer stays silent.
pub async fn grab(ip: &str, port: u16) -> Option<BannerProbe> {
    let addr = format!("{}:{}", ip, port);
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .ok()?
        .ok()?;

    let mut raw: Vec<u8> = Vec::new();

    if SMTP_PORTS.contains(&port) {
        let _ = stream.write_all(b"EHLO netcatalog.local\r\n").await;
        read_some(&mut stream, &mut raw, CONNECT_TIMEOUT).await;
    } else {
        read_some(&mut stream, &mut raw, PASSIVE_WAIT).await;
        if raw.is_empty() {
            // Silent service: a stray HTTP request is the last resort.
            let _ = stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await;
            read_some(&mut stream, &mut raw, CONNECT_TIMEOUT).await;
        }
    }

    if raw.is_empty() {
        return None;
    }

    raw.truncate(MAX_BANNER_BYTES);
    let text = strip_nul(String::from_utf8_lossy(&raw).trim());
    let mut probe = analyze(&raw, &text);
    probe.text = text;
    Some(probe)
}

async fn read_some(stream: &mut TcpStream, into: &mut Vec<u8>, wait: Duration) {
    let mut buf = [0u8; 1024];
    // First read gets the full wait; subsequent reads only drain what is
    // already in flight.
    let mut budget = wait;
    while into.len() < MAX_BANNER_BYTES {
        match timeout(budget, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                into.extend_from_slice(&buf[..n]);
                budget = Duration::from_millis(300);
            }
            _ => break,
        }
    }
}

static SSH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SSH-[\d.]+-([A-Za-z][\w\-]*?)[_/\- ]([\w.]+)").unwrap());
static FTP_PRODUCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)220[ -].*?(proftpd|vsftpd|pure-ftpd|filezilla server|microsoft ftp)[ /]?v?([\w.]+)?").unwrap()
});
static SMTP_PRODUCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(postfix|exim|sendmail|exchange)[ /]?([\w.]+)?").unwrap());
static MYSQL_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.[\w.]+-?(?:MariaDB)?[\w.-]*)").unwrap());
static HTTP_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>\s*(.*?)\s*</title>").unwrap());
static HTTP_SERVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^server:\s*(.+?)\s*$").unwrap());

/// Deterministic protocol identification over a captured banner.
pub fn analyze(raw: &[u8], text: &str) -> BannerProbe {
    let mut probe = BannerProbe::default();
    let lower = text.to_lowercase();

    if text.starts_with("SSH-") {
        probe.identified = Some("SSH".to_string());
        if let Some(caps) = SSH_RE.captures(text) {
            probe.product = Some(caps[1].to_string());
            probe.version = Some(caps[2].to_string());
        }
        return probe;
    }

    if raw.starts_with(b"RFB ") {
        probe.identified = Some("VNC".to_string());
        probe.version = text.strip_prefix("RFB ").map(|v| v.trim().to_string());
        return probe;
    }

    if raw.starts_with(&[0x03, 0x00]) {
        probe.identified = Some("RDP".to_string());
        return probe;
    }

    if text.starts_with("SIP/2.0") || lower.contains("sip/2.0") && lower.contains("cseq") {
        probe.identified = Some("SIP".to_string());
        return probe;
    }

    if text.starts_with("HTTP/1.") || text.starts_with("HTTP/2") {
        // A stray HTTP response leaked in through the raw socket path.
        probe.identified = Some("HTTP".to_string());
        probe.http_title = HTTP_TITLE_RE.captures(text).map(|c| c[1].to_string());
        probe.product = HTTP_SERVER_RE.captures(text).map(|c| c[1].to_string());
        return probe;
    }

    if lower.starts_with("220") && (lower.contains("smtp") || lower.contains("esmtp")) {
        probe.identified = Some("SMTP".to_string());
        if let Some(caps) = SMTP_PRODUCT_RE.captures(text) {
            probe.product = Some(caps[1].to_string());
            probe.version = caps.get(2).map(|v| v.as_str().to_string());
        }
        return probe;
    }

    if lower.starts_with("220") {
        if let Some(caps) = FTP_PRODUCT_RE.captures(text) {
            probe.identified = Some("FTP".to_string());
            probe.product = Some(caps[1].to_string());
            probe.version = caps.get(2).map(|v| v.as_str().to_string());
            return probe;
        }
        if lower.contains("ftp") {
            probe.identified = Some("FTP".to_string());
            return probe;
        }
    }

    if lower.starts_with("* ok") {
        probe.identified = Some("IMAP".to_string());
        if lower.contains("dovecot") {
            probe.product = Some("Dovecot".to_string());
        }
        return probe;
    }

    if lower.starts_with("+ok") {
        probe.identified = Some("POP3".to_string());
        return probe;
    }

    if lower.contains("mariadb") {
        probe.identified = Some("MariaDB".to_string());
        probe.version = MYSQL_VERSION_RE.captures(text).map(|c| c[1].to_string());
        return probe;
    }

    if lower.contains("mysql") || lower.contains("caching_sha2_password")
        || lower.contains("mysql_native_password")
    {
        probe.identified = Some("MySQL".to_string());
        probe.version = MYSQL_VERSION_RE.captures(text).map(|c| c[1].to_string());
        return probe;
    }

    if lower.contains("pg_hba") || lower.contains("postgres") {
        probe.identified = Some("PostgreSQL".to_string());
        return probe;
    }

    if lower.starts_with("-err") || lower.contains("redis") || lower.starts_with("+pong")
        || lower.contains("noauth authentication required")
    {
        probe.identified = Some("Redis".to_string());
        return probe;
    }

    if lower.contains("mongodb") {
        probe.identified = Some("MongoDB".to_string());
        return probe;
    }

    if text.starts_with("ERROR") && text.len() < 16 {
        probe.identified = Some("Memcached".to_string());
        return probe;
    }

    if lower.contains("mqtt") || lower.contains("mqisdp") {
        probe.identified = Some("MQTT".to_string());
        return probe;
    }

    // BER sequence opener; require a non-printable length byte so plain
    // text starting with '0' does not qualify.
    if raw.first() == Some(&0x30) && raw.get(1).is_some_and(|b| !b.is_ascii_graphic()) {
        probe.identified = Some("LDAP".to_string());
        return probe;
    }

    probe
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_text(text: &str) -> BannerProbe {
        analyze(text.as_bytes(), text)
    }

    #[test]
    fn ssh_banner_with_product_and_version() {
        let probe = analyze_text("SSH-2.0-OpenSSH_9.2p1 Debian-2+deb12u3");
        assert_eq!(probe.identified.as_deref(), Some("SSH"));
        assert_eq!(probe.product.as_deref(), Some("OpenSSH"));
        assert_eq!(probe.version.as_deref(), Some("9.2p1"));
    }

    #[test]
    fn smtp_and_ftp_are_distinguished() {
        let smtp = analyze_text("220 mail.example.org ESMTP Postfix (Debian)");
        assert_eq!(smtp.identified.as_deref(), Some("SMTP"));
        assert_eq!(smtp.product.as_deref(), Some("Postfix"));

        let ftp = analyze_text("220 ProFTPD 1.3.8 Server ready");
        assert_eq!(ftp.identified.as_deref(), Some("FTP"));
        assert_eq!(ftp.product.as_deref(), Some("ProFTPD"));
        assert_eq!(ftp.version.as_deref(), Some("1.3.8"));
    }

    #[test]
    fn database_banners() {
        let mariadb = analyze_text("x\n5.5.5-10.11.6-MariaDB-0+deb12u1mysql_native_password");
        assert_eq!(mariadb.identified.as_deref(), Some("MariaDB"));

        let redis = analyze_text("-ERR unknown command 'GET'");
        assert_eq!(redis.identified.as_deref(), Some("Redis"));
    }

    #[test]
    fn vnc_and_stray_http() {
        let vnc = analyze_text("RFB 003.008");
        assert_eq!(vnc.identified.as_deref(), Some("VNC"));
        assert_eq!(vnc.version.as_deref(), Some("003.008"));

        let http = analyze_text(
            "HTTP/1.0 200 OK\r\nServer: BusyBox httpd\r\n\r\n<html><title>Router</title></html>",
        );
        assert_eq!(http.identified.as_deref(), Some("HTTP"));
        assert_eq!(http.http_title.as_deref(), Some("Router"));
        assert_eq!(http.product.as_deref(), Some("BusyBox httpd"));
    }

    #[test]
    fn imap_pop3_and_unknown() {
        assert_eq!(
            analyze_text("* OK [CAPABILITY IMAP4rev1] Dovecot ready.").identified.as_deref(),
            Some("IMAP")
        );
        assert_eq!(
            analyze_text("+OK POP3 server ready").identified.as_deref(),
            Some("POP3")
        );
        assert!(analyze_text("something opaque").identified.is_none());
    }
}
