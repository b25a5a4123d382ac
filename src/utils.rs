use url::Url;

use crate::error::{DownloadError, Result};

/// File name the finished download is stored under, taken from the last path
/// segment of the address.
pub fn display_name(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| DownloadError::InvalidConfig(format!("bad address {url_str:?}: {e}")))?;

    if let Some(name) = url.path_segments().and_then(|mut s| s.next_back()) {
        let name = sanitize_filename(name);
        if !name.is_empty() && name != "." && name != ".." {
            return Ok(name);
        }
    }

    // Fallback if no filename found in path
    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_last_segment() {
        assert_eq!(display_name("http://host/pub/linux.iso").unwrap(), "linux.iso");
        assert_eq!(display_name("http://host/a/b%20c.tar.gz?x=1").unwrap(), "b_20c.tar.gz");
    }

    #[test]
    fn fallback_name_when_path_is_empty() {
        assert!(display_name("http://host/").unwrap().starts_with("download_"));
    }

    #[test]
    fn rejects_unparseable_address() {
        assert!(matches!(display_name("not a url"), Err(DownloadError::InvalidConfig(_))));
    }
}
