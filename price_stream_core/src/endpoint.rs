// Stream URL derivation from the hosting page's origin

use crate::error::StreamError;
use url::Url;

/// Build the stream URL for a page served from `page_url`: the scheme is
/// upgraded to its websocket variant, host and port are kept, and the path
/// is replaced with `path`.
pub fn derive_stream_endpoint(page_url: &str, path: &str) -> Result<String, StreamError> {
    let mut url = Url::parse(page_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(StreamError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                other, page_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| StreamError::InvalidEndpoint(format!("cannot upgrade scheme of {}", page_url)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_upgrades_to_ws() {
        assert_eq!(
            derive_stream_endpoint("http://localhost:3333/dashboard?tab=1", "/ws").unwrap(),
            "ws://localhost:3333/ws"
        );
    }

    #[test]
    fn test_https_upgrades_to_wss() {
        assert_eq!(
            derive_stream_endpoint("https://example.com", "/trades").unwrap(),
            "wss://example.com/trades"
        );
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            derive_stream_endpoint("ftp://example.com", "/ws"),
            Err(StreamError::InvalidEndpoint(_))
        ));
        assert!(derive_stream_endpoint("not a url", "/ws").is_err());
    }
}
