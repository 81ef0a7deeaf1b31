// Stream identity and URL parsing

use std::collections::HashMap;

use url::Url;

use crate::error::{RtmpError, RtmpResult};

/// Default RTMP port
pub const RTMP_DEFAULT_PORT: u16 = 1935;

/// Identity of a logical live stream
#[derive(Clone)]
pub struct StreamInfo {
    /// Application name
    pub app: String,

    /// Stream name
    pub name: String,

    /// Full URL, if known
    pub url: String,
}

impl StreamInfo {
    /// Creates the info from its parts
    pub fn new(app: &str, name: &str, url: &str) -> StreamInfo {
        StreamInfo {
            app: app.to_string(),
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// The composite stream key, unique within one process
    pub fn key(&self) -> String {
        format!("{}/{}", self.app, self.name)
    }
}

/// Parsed RTMP URL
pub struct RtmpUrl {
    /// True for rtmps://
    pub tls: bool,

    /// Host name or address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Application name (first path segment)
    pub app: String,

    /// Stream name (rest of the path)
    pub name: String,

    /// Raw query string, without the '?'
    pub query: String,
}

impl RtmpUrl {
    /// Parses an rtmp:// or rtmps:// URL into its stream parts
    pub fn parse(raw_url: &str) -> RtmpResult<RtmpUrl> {
        let parsed = Url::parse(raw_url)
            .map_err(|e| RtmpError::Protocol(format!("invalid URL: {}", e)))?;

        let tls = match parsed.scheme() {
            "rtmp" => false,
            "rtmps" => true,
            other => {
                return Err(RtmpError::Protocol(format!(
                    "unsupported URL scheme: {}",
                    other
                )));
            }
        };

        let host = match parsed.host_str() {
            Some(h) => h.to_string(),
            None => {
                return Err(RtmpError::protocol("URL has no host"));
            }
        };

        let port = parsed.port().unwrap_or(RTMP_DEFAULT_PORT);

        let path = parsed.path().trim_start_matches('/');
        let mut parts = path.splitn(2, '/');

        let app = parts.next().unwrap_or("").to_string();
        let name = parts.next().unwrap_or("").to_string();

        if app.is_empty() || name.is_empty() {
            return Err(RtmpError::Protocol(format!(
                "URL path must be /<app>/<stream>: {}",
                raw_url
            )));
        }

        let query = parsed.query().unwrap_or("").to_string();

        Ok(RtmpUrl {
            tls,
            host,
            port,
            app,
            name,
            query,
        })
    }

    /// The tcUrl reported in the connect command
    pub fn tc_url(&self) -> String {
        let scheme = if self.tls { "rtmps" } else { "rtmp" };

        if self.port == RTMP_DEFAULT_PORT {
            format!("{}://{}/{}", scheme, self.host, self.app)
        } else {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, self.app)
        }
    }

    /// The address to dial
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The publish/play parameters carried by the query string
    pub fn query_params(&self) -> HashMap<String, String> {
        stream_query_params(&self.query)
    }

    /// The stream identity for this URL
    pub fn stream_info(&self) -> StreamInfo {
        let scheme = if self.tls { "rtmps" } else { "rtmp" };

        StreamInfo {
            app: self.app.clone(),
            name: self.name.clone(),
            url: format!(
                "{}://{}:{}/{}/{}",
                scheme, self.host, self.port, self.app, self.name
            ),
        }
    }
}

/// Splits the query portion of a stream name or URL into its
/// publish/play parameters (`cache=clear`, auth tokens).
/// Values are passed through raw, RTMP peers do not percent-encode them.
pub fn stream_query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;

            if key.is_empty() {
                return None;
            }

            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_url() {
        let parsed = RtmpUrl::parse("rtmp://127.0.0.1:1935/live/cam1").unwrap();

        assert!(!parsed.tls);
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 1935);
        assert_eq!(parsed.app, "live");
        assert_eq!(parsed.name, "cam1");
        assert_eq!(parsed.tc_url(), "rtmp://127.0.0.1/live");
        assert_eq!(parsed.stream_info().key(), "live/cam1");
    }

    #[test]
    fn test_parse_url_with_default_port_and_query() {
        let parsed = RtmpUrl::parse("rtmp://example.com/app/room/feed?token=abc").unwrap();

        assert_eq!(parsed.port, RTMP_DEFAULT_PORT);
        assert_eq!(parsed.app, "app");
        assert_eq!(parsed.name, "room/feed");
        assert_eq!(parsed.query, "token=abc");
    }

    #[test]
    fn test_parse_tls_url() {
        let parsed = RtmpUrl::parse("rtmps://example.com:8443/live/cam1").unwrap();

        assert!(parsed.tls);
        assert_eq!(parsed.port, 8443);
        assert_eq!(parsed.tc_url(), "rtmps://example.com:8443/live");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(RtmpUrl::parse("http://example.com/live/cam1").is_err());
        assert!(RtmpUrl::parse("rtmp://example.com/justapp").is_err());
        assert!(RtmpUrl::parse("not a url").is_err());
    }

    #[test]
    fn test_stream_query_params() {
        assert!(stream_query_params("").is_empty());

        let params = stream_query_params("cache=clear&token=abc&malformed");

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("cache").unwrap(), "clear");
        assert_eq!(params.get("token").unwrap(), "abc");

        let parsed = RtmpUrl::parse("rtmp://host/live/cam1?cache=clear").unwrap();

        assert_eq!(parsed.query_params().get("cache").unwrap(), "clear");
    }
}
