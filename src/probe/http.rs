//! HTTP(S) probe: fetch `/` over both schemes, parse headers, extract
//! page features the identifier layers consume.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::patterns::{self, AppPattern};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(6);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_REDIRECTS: usize = 3;
pub const MAX_BODY_BYTES: usize = 64 * 1024;
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; NetCatalog/0.3)";

#[derive(Debug, Clone, Default)]
pub struct HttpHeaders {
    pub server: Option<String>,
    pub content_type: Option<String>,
    pub powered_by: Option<String>,
    pub set_cookies: Vec<String>,
    pub location: Option<String>,
    pub all: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub title: Option<String>,
    pub generator: Option<String>,
    pub description: Option<String>,
    pub scripts: Vec<String>,
    pub links: Vec<String>,
    pub patterns: Vec<&'static AppPattern>,
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    pub protocol: &'static str,
    pub status_code: u16,
    pub headers: HttpHeaders,
    pub body: String,
    pub extracted: Extracted,
}

/// Client configured for probing unknown gear: short timeouts, few
/// redirects, self-signed certificates accepted.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .danger_accept_invalid_certs(true)
        .user_agent(USER_AGENT)
        .build()
}

/// GET `scheme://ip:port/`. The response after redirects is authoritative
/// for status and headers. `None` means the endpoint does not speak HTTP
/// on this scheme.
pub async fn fetch(
    client: &reqwest::Client,
    protocol: &'static str,
    ip: &str,
    port: u16,
) -> Option<HttpProbe> {
    let url = format!("{}://{}:{}/", protocol, ip, port);

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::trace!("{} probe failed for {}: {}", protocol, url, e);
            return None;
        }
    };

    let status_code = response.status().as_u16();
    let headers = parse_headers(response.headers());

    let body_bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(_) => Default::default(),
    };
    let end = body_bytes.len().min(MAX_BODY_BYTES);
    let body = String::from_utf8_lossy(&body_bytes[..end]).into_owned();

    let extracted = extract_features(&body);

    Some(HttpProbe {
        protocol,
        status_code,
        headers,
        body,
        extracted,
    })
}

fn parse_headers(headers: &reqwest::header::HeaderMap) -> HttpHeaders {
    let mut parsed = HttpHeaders::default();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        let key = name.as_str().to_lowercase();
        match key.as_str() {
            "server" => parsed.server = Some(value.to_string()),
            "content-type" => parsed.content_type = Some(value.to_string()),
            "x-powered-by" => parsed.powered_by = Some(value.to_string()),
            "set-cookie" => parsed.set_cookies.push(value.to_string()),
            "location" => parsed.location = Some(value.to_string()),
            _ => {}
        }
        parsed.all.insert(key, value.to_string());
    }
    parsed
}

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>\s*(.*?)\s*</title>").unwrap());
static GENERATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+name=["']generator["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+name=["']description["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)src=["']([^"']+)["']"#).unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href=["']([^"']+)["']"#).unwrap());

/// Pull title, meta tags, referenced assets and known-application
/// indicators out of a fetched body. Naming stays with the identifier.
pub fn extract_features(body: &str) -> Extracted {
    let lower = body.to_lowercase();

    Extracted {
        title: TITLE_RE
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .filter(|t| !t.is_empty()),
        generator: GENERATOR_RE.captures(body).map(|c| c[1].trim().to_string()),
        description: DESCRIPTION_RE
            .captures(body)
            .map(|c| c[1].trim().to_string()),
        scripts: SCRIPT_RE
            .captures_iter(body)
            .take(20)
            .map(|c| c[1].to_string())
            .collect(),
        links: LINK_RE
            .captures_iter(body)
            .take(40)
            .map(|c| c[1].to_string())
            .collect(),
        patterns: patterns::match_all(&lower),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
<title> Grafana </title>
<meta name="generator" content="Hugo 0.1">
<meta name="description" content="Observability stack">
<script src="/public/build/app.js"></script>
<link rel="stylesheet" href="/public/build/grafana.light.css">
</head><body>grafana login</body></html>"#;

    #[test]
    fn extracts_title_meta_and_assets() {
        let extracted = extract_features(PAGE);
        assert_eq!(extracted.title.as_deref(), Some("Grafana"));
        assert_eq!(extracted.generator.as_deref(), Some("Hugo 0.1"));
        assert_eq!(extracted.description.as_deref(), Some("Observability stack"));
        assert_eq!(extracted.scripts, vec!["/public/build/app.js".to_string()]);
        assert!(extracted.links.iter().any(|l| l.contains("grafana.light")));
        assert_eq!(extracted.patterns[0].name, "Grafana");
    }

    #[test]
    fn empty_title_is_none() {
        let extracted = extract_features("<html><title>  </title></html>");
        assert!(extracted.title.is_none());
    }

    #[test]
    fn title_spanning_lines() {
        let extracted = extract_features("<title>\n  FRITZ!Box 7590\n</title>");
        assert_eq!(extracted.title.as_deref(), Some("FRITZ!Box 7590"));
    }
}
