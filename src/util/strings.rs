/// Strip NUL bytes before anything reaches the store or a log line.
pub fn strip_nul(input: &str) -> String {
    if input.contains('\0') {
        input.replace('\0', "")
    } else {
        input.to_string()
    }
}

/// Canonical lowercase MAC: six hex pairs, colon separated.
///
/// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and bare `aabbccddeeff`.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_lowercase();

    if hex.len() != 12 {
        return None;
    }

    let pairs: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

/// First 8 characters of a normalized MAC (`aa:bb:cc`), the vendor OUI.
pub fn mac_oui_prefix(mac: &str) -> Option<&str> {
    if mac.len() >= 8 { Some(&mac[..8]) } else { None }
}

/// Strip an optional CIDR suffix from an address string (`10.0.0.5/24` -> `10.0.0.5`).
pub fn strip_cidr_suffix(addr: &str) -> &str {
    addr.split('/').next().unwrap_or(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nul_bytes() {
        assert_eq!(strip_nul("ab\0cd\0"), "abcd");
        assert_eq!(strip_nul("clean"), "clean");
    }

    #[test]
    fn normalizes_mac_formats() {
        assert_eq!(
            normalize_mac("BC:24:11:AA:BB:CC").as_deref(),
            Some("bc:24:11:aa:bb:cc")
        );
        assert_eq!(
            normalize_mac("bc-24-11-aa-bb-cc").as_deref(),
            Some("bc:24:11:aa:bb:cc")
        );
        assert_eq!(
            normalize_mac("BC2411AABBCC").as_deref(),
            Some("bc:24:11:aa:bb:cc")
        );
        assert_eq!(normalize_mac("bc:24:11"), None);
    }

    #[test]
    fn strips_cidr_suffix() {
        assert_eq!(strip_cidr_suffix("10.0.0.5/24"), "10.0.0.5");
        assert_eq!(strip_cidr_suffix("10.0.0.5"), "10.0.0.5");
    }
}
