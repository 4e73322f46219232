//! Public IP discovery over HTTP.
//!
//! Used when the pool listens on an unspecified address and needs a
//! routable address to advertise. Failure is never fatal.

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

use crate::error::{NetworkError, NetworkResult};

const PRIMARY_URL: &str = "http://icanhazip.com";
const FALLBACK_URL: &str = "http://checkip.dyndns.org";

/// Per-request timeout.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Ask the primary service for our address, falling back to the secondary.
pub async fn discover() -> NetworkResult<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| NetworkError::IpDiscovery(format!("failed to create HTTP client: {e}")))?;

    match fetch(&client, PRIMARY_URL).await.and_then(|body| parse_plain(&body)) {
        Ok(ip) => return Ok(ip),
        Err(e) => debug!(url = PRIMARY_URL, error = %e, "IP lookup failed, trying fallback"),
    }

    let body = fetch(&client, FALLBACK_URL).await?;
    parse_dyndns(&body)
}

async fn fetch(client: &reqwest::Client, url: &str) -> NetworkResult<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| NetworkError::IpDiscovery(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(NetworkError::IpDiscovery(format!(
            "{url}: status {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| NetworkError::IpDiscovery(format!("{url}: {e}")))
}

/// A body that is nothing but an address.
pub(crate) fn parse_plain(body: &str) -> NetworkResult<IpAddr> {
    let text = body.trim();
    text.parse()
        .map_err(|_| NetworkError::IpDiscovery(format!("not an IP address: {text:?}")))
}

/// An HTML page containing `IP Address: <ip>` (case-insensitive).
pub(crate) fn parse_dyndns(body: &str) -> NetworkResult<IpAddr> {
    const MARKER: &str = "ip address:";
    let start = body
        .to_ascii_lowercase()
        .find(MARKER)
        .ok_or_else(|| NetworkError::IpDiscovery("no address in response".into()))?;
    let candidate: String = body[start + MARKER.len()..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_hexdigit() || *c == '.' || *c == ':')
        .collect();
    parse_plain(&candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_body_with_newline() {
        let ip = parse_plain("203.0.113.7\n").unwrap();
        assert_eq!(ip, "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn plain_body_rejects_html() {
        assert!(matches!(
            parse_plain("<html>oops</html>"),
            Err(NetworkError::IpDiscovery(_))
        ));
    }

    #[test]
    fn dyndns_page() {
        let body = "<html><head><title>Current IP Check</title></head>\
                    <body>Current IP Address: 198.51.100.23</body></html>";
        assert_eq!(
            parse_dyndns(body).unwrap(),
            "198.51.100.23".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn dyndns_marker_is_case_insensitive() {
        let body = "ip address:2001:db8::1</body>";
        assert_eq!(
            parse_dyndns(body).unwrap(),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn dyndns_without_marker_fails() {
        assert!(parse_dyndns("<html></html>").is_err());
    }
}
