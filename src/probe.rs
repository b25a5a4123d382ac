use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::Client;
use tracing::{debug, instrument};

use crate::error::{DownloadError, Result};
use crate::state::Identity;

/// What a metadata-only request tells us about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub total_size: u64,
    pub identity: Identity,
    pub supports_ranges: bool,
}

#[instrument(skip(client))]
pub async fn probe(client: &Client, url: &str) -> Result<ResourceInfo> {
    let response = client.head(url).send().await.map_err(|e| DownloadError::Probe {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(DownloadError::Probe {
            url: url.to_string(),
            reason: format!("server answered {}", response.status()),
        });
    }

    let info = parse_headers(url, response.headers())?;
    debug!(
        total_size = info.total_size,
        etag = ?info.identity.etag,
        last_modified = ?info.identity.last_modified,
        supports_ranges = info.supports_ranges,
        "probed resource"
    );
    Ok(info)
}

/// Extracts size, identity tokens and range support from response headers.
pub fn parse_headers(url: &str, headers: &HeaderMap) -> Result<ResourceInfo> {
    let probe_error = |reason: String| DownloadError::Probe {
        url: url.to_string(),
        reason,
    };

    let total_size = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| probe_error("missing Content-Length header".into()))?
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| probe_error("unparseable Content-Length header".into()))?;

    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let last_modified = match headers.get(LAST_MODIFIED) {
        None => None,
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| probe_error("non-ASCII Last-Modified header".into()))?;
            let parsed = DateTime::parse_from_rfc2822(raw)
                .map_err(|e| probe_error(format!("unparseable Last-Modified {raw:?}: {e}")))?;
            Some(parsed.with_timezone(&Utc))
        }
    };

    let supports_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().is_empty() && !v.trim().eq_ignore_ascii_case("none"))
        .unwrap_or(false);

    Ok(ResourceInfo {
        total_size,
        identity: Identity { etag, last_modified },
        supports_ranges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(reqwest::header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn reads_size_identity_and_range_support() {
        let map = headers(&[
            (CONTENT_LENGTH, "2500000"),
            (ETAG, "\"5f3e-abc\""),
            (LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
            (ACCEPT_RANGES, "bytes"),
        ]);
        let info = parse_headers("http://host/f", &map).unwrap();
        assert_eq!(info.total_size, 2_500_000);
        assert_eq!(info.identity.etag.as_deref(), Some("\"5f3e-abc\""));
        assert_eq!(
            info.identity.last_modified,
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
        assert!(info.supports_ranges);
    }

    #[test]
    fn range_support_requires_accept_ranges() {
        let info = parse_headers("http://host/f", &headers(&[(CONTENT_LENGTH, "10")])).unwrap();
        assert!(!info.supports_ranges);
        assert_eq!(info.identity, Identity::default());

        let none = headers(&[(CONTENT_LENGTH, "10"), (ACCEPT_RANGES, "none")]);
        assert!(!parse_headers("http://host/f", &none).unwrap().supports_ranges);
    }

    #[test]
    fn missing_or_bad_size_is_a_probe_error() {
        let err = parse_headers("http://host/f", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, DownloadError::Probe { .. }));

        let err = parse_headers("http://host/f", &headers(&[(CONTENT_LENGTH, "lots")])).unwrap_err();
        assert!(matches!(err, DownloadError::Probe { .. }));
    }

    #[test]
    fn bad_last_modified_is_a_probe_error() {
        let map = headers(&[(CONTENT_LENGTH, "10"), (LAST_MODIFIED, "yesterday")]);
        let err = parse_headers("http://host/f", &map).unwrap_err();
        assert!(matches!(err, DownloadError::Probe { .. }));
    }
}
