use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Hostname suffixes that only resolve inside private networks.
const FORBIDDEN_HOST_SUFFIXES: &[&str] = &[".local", ".localhost", ".internal", ".lan", ".home"];

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) through
/// caller-supplied feed endpoints.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost or an internal-only hostname.
    #[error("Internal host not allowed: {0}")]
    InternalHost(String),
}

/// Validates a caller-supplied feed endpoint URL.
///
/// Registry endpoints come from trusted configuration and are not passed
/// through here; this guards the ad hoc `POST /feed/custom` surface.
///
/// Rejects:
/// - Non-HTTP(S) schemes (e.g., `file://`, `ftp://`)
/// - Localhost (`localhost`, `127.0.0.1`, `::1`) and internal suffixes (`.local`, `.internal`, ...)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6, unspecified)
///
/// # Examples
///
/// ```
/// use inkfeed::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host() {
        None => return Err(UrlValidationError::MissingHost),
        Some(url::Host::Domain(domain)) => {
            let lower = domain.to_ascii_lowercase();
            if lower == "localhost"
                || FORBIDDEN_HOST_SUFFIXES
                    .iter()
                    .any(|suffix| lower.ends_with(suffix))
            {
                return Err(UrlValidationError::InternalHost(lower));
            }
        }
        Some(url::Host::Ipv4(ipv4)) => check_ip(IpAddr::V4(ipv4))?,
        Some(url::Host::Ipv6(ipv6)) => check_ip(IpAddr::V6(ipv6))?,
    }

    Ok(url)
}

/// Returns true if `candidate` is an absolute http(s) URL.
///
/// Used to accept image references from feeds without applying the SSRF
/// policy: images are rendered by clients, never fetched by this service.
pub fn is_absolute_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

fn check_ip(ip: IpAddr) -> Result<(), UrlValidationError> {
    if ip.is_loopback() {
        return Err(UrlValidationError::InternalHost(ip.to_string()));
    }
    if is_private_ip(&ip) {
        return Err(UrlValidationError::PrivateIp(ip.to_string()));
    }
    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
