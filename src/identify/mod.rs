//! Layered service identification.
//!
//! Deterministic match over a [`ProbeResult`]: layers run in a fixed order,
//! the first hit wins, and `match_source` records which layer fired.

pub mod signatures;

use crate::probe::ProbeResult;

/// Outcome of the layered match for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub identified_as: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub match_source: &'static str,
    pub icon: Option<&'static str>,
}

impl Identification {
    fn new(name: impl Into<String>, match_source: &'static str) -> Self {
        Self {
            identified_as: name.into(),
            product: None,
            version: None,
            match_source,
            icon: None,
        }
    }
}

/// Run the layer stack for one port.
///
/// `scanner_product` is the external scanner's service guess, consulted
/// only when every probe-driven layer missed.
pub fn identify(port: u16, probe: &ProbeResult, scanner_product: Option<&str>) -> Identification {
    if let Some(http) = &probe.http {
        // Layer 1: title signatures.
        if let Some(name) = http
            .extracted
            .title
            .as_deref()
            .and_then(signatures::match_title)
        {
            return Identification::new(name, "title");
        }

        // Layer 2: body patterns from the known-application dictionary.
        if let Some(pattern) = http.extracted.patterns.first() {
            let mut id = Identification::new(pattern.name, "body-pattern");
            id.icon = Some(pattern.icon);
            return id;
        }

        // Layer 3: server-header signatures.
        if let Some(name) = http
            .headers
            .server
            .as_deref()
            .and_then(signatures::match_server)
        {
            return Identification::new(name, "server-header");
        }

        // Layer 4: cookie signatures over all Set-Cookie values.
        if !http.headers.set_cookies.is_empty() {
            let cookies = http.headers.set_cookies.join("; ");
            if let Some(name) = signatures::match_cookies(&cookies) {
                return Identification::new(name, "cookie");
            }
        }

        // Layer 5: the Prober's app-endpoint match.
        if let Some(name) = probe.app_endpoint {
            return Identification::new(name, "app-endpoint");
        }

        // Layer 6: generic web server.
        if let Some((name, version)) = http
            .headers
            .server
            .as_deref()
            .and_then(signatures::match_generic_server)
        {
            let mut id = Identification::new(name, "generic-web");
            id.product = Some(name.to_string());
            id.version = version;
            return id;
        }
        if let Some(title) = &http.extracted.title {
            return Identification::new(format!("Web App: {}", title), "generic-web");
        }
        return Identification::new(
            format!("HTTP Service ({})", http.status_code),
            "generic-web",
        );
    }

    if let Some(banner) = &probe.banner {
        // Layer 7: protocol identified from the banner.
        if let Some(identified) = &banner.identified {
            let mut id = Identification::new(identified.clone(), "banner");
            id.product = banner.product.clone();
            id.version = banner.version.clone();
            return id;
        }

        // Layer 8: opaque banner.
        if !banner.text.is_empty() {
            let head: String = banner.text.chars().take(40).collect();
            return Identification::new(format!("Unknown (Banner: {})", head), "banner-raw");
        }
    }

    // Layer 9: well-known port fallback.
    if let Some(name) = signatures::port_fallback(port) {
        return Identification::new(name, "port-fallback");
    }

    // Layer 10: the scanner's own guess.
    if let Some(product) = scanner_product.filter(|p| !p.is_empty()) {
        return Identification::new(product, "scanner");
    }

    // Layer 11: nothing fit.
    Identification::new(format!("Unknown (Port {})", port), "default")
}
