use url::Url;

/// Strip a single leading "www." and lower-case the host
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Extract the tracking domain from a page URL
///
/// Returns `None` for URLs without a host (file:, data:, about:blank, ...)
/// or that fail to parse.
pub fn domain_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let domain = normalize_host(host);
    if domain.is_empty() { None } else { Some(domain) }
}

/// Normalize user input from the options surface
///
/// Accepts a bare domain ("www.Example.com"), a domain with a path
/// ("example.com/feed") or a full URL.
pub fn normalize_domain_input(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains("://") {
        return domain_from_url(input);
    }

    domain_from_url(&format!("https://{}", input))
}
