//! Pure conversions between blob keys, simple names, extensions and public
//! download URLs. Nothing in here touches the network.

use crate::{
    errors::{HelperError, HelperResult},
    models::SEPARATOR,
    services::classifier::ContentClassifier,
};
use url::Url;

/// Host serving public download URLs.
pub const DEFAULT_STORAGE_HOST: &str = "firebasestorage.googleapis.com";

/// Everything after the last separator, or the whole key when there is none.
///
/// ```
/// use blob_helper::services::name_codec::simple_name;
///
/// assert_eq!(simple_name("goods/20180101/image_label1.jpeg"), "image_label1.jpeg");
/// assert_eq!(simple_name("image_label1"), "image_label1");
/// ```
pub fn simple_name(key: &str) -> &str {
    match key.rfind(SEPARATOR) {
        Some(i) => &key[i + SEPARATOR.len_utf8()..],
        None => key,
    }
}

/// Extension taken from the simple name, case preserved.
///
/// Present only when the last dot has at least one character on each side.
pub fn extension_from_key(key: &str) -> Option<&str> {
    let (stem, ext) = simple_name(key).rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

pub fn extension_from_content_type(
    classifier: &dyn ContentClassifier,
    mime_type: &str,
) -> HelperResult<String> {
    classifier
        .extension_for(mime_type)
        .ok_or_else(|| HelperError::UnknownMimeType(mime_type.to_string()))
}

/// Key with its final segment replaced by `new_simple_name`.
pub fn renamed_key(key: &str, new_simple_name: &str) -> String {
    match key.rfind(SEPARATOR) {
        Some(i) => format!("{}{}", &key[..=i], new_simple_name),
        None => new_simple_name.to_string(),
    }
}

/// `https://{host}/v0/b/{bucket}/o/{key}?alt=media[&token={token}]`
///
/// The key is encoded as one path segment, so `/` becomes `%2F`.
pub fn build_download_url(
    storage_host: &str,
    bucket: &str,
    key: &str,
    token: Option<&str>,
) -> String {
    let mut url = format!(
        "https://{}/v0/b/{}/o/{}?alt=media",
        storage_host,
        urlencoding::encode(bucket),
        urlencoding::encode(key)
    );
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

/// Recover the blob key from a download URL's last path segment.
pub fn parse_blob_key_from_url(url: &str) -> HelperResult<String> {
    let malformed = || HelperError::MalformedUrl(url.to_string());

    let parsed = Url::parse(url).map_err(|_| malformed())?;
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(malformed)?;

    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::MimeRegistry;

    const BUCKET: &str = "steady-copilot-206205.appspot.com";

    #[test]
    fn simple_name_never_contains_separator() {
        for key in ["a", "a/b", "a/b/c.txt", "/lead", "x//y"] {
            assert!(!simple_name(key).contains('/'), "{key}");
        }
        assert_eq!(simple_name("a/b/"), "");
    }

    #[test]
    fn extension_keeps_case_and_needs_both_sides() {
        assert_eq!(extension_from_key("a/b/file.PDF"), Some("PDF"));
        assert_eq!(extension_from_key("archive.tar.gz"), Some("gz"));
        assert_eq!(extension_from_key("a/b/file"), None);
        assert_eq!(extension_from_key("dir.d/file"), None);
        assert_eq!(extension_from_key(".bashrc"), None);
        assert_eq!(extension_from_key("trailing."), None);
    }

    #[test]
    fn unknown_mime_type_is_an_error() {
        let err = extension_from_content_type(&MimeRegistry, "application/x-nope").unwrap_err();
        assert!(matches!(err, HelperError::UnknownMimeType(m) if m == "application/x-nope"));
        assert_eq!(
            extension_from_content_type(&MimeRegistry, "image/jpeg").unwrap(),
            "jpeg"
        );
    }

    #[test]
    fn rename_replaces_only_the_last_segment() {
        assert_eq!(renamed_key("x/y/old.txt", "new.txt"), "x/y/new.txt");
        assert_eq!(renamed_key("old.txt", "new.txt"), "new.txt");
    }

    #[test]
    fn builds_the_public_url_format() {
        let url = build_download_url(
            DEFAULT_STORAGE_HOST,
            BUCKET,
            "goods/20180101/image_label1.jpeg",
            Some("65964335-7987-458e-9a79-d336e3ddc5ba"),
        );
        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/steady-copilot-206205.appspot.com\
             /o/goods%2F20180101%2Fimage_label1.jpeg?alt=media\
             &token=65964335-7987-458e-9a79-d336e3ddc5ba"
        );
    }

    #[test]
    fn blank_token_is_omitted() {
        let url = build_download_url(DEFAULT_STORAGE_HOST, BUCKET, "a.txt", Some("  "));
        assert!(url.ends_with("/o/a.txt?alt=media"));
        let url = build_download_url(DEFAULT_STORAGE_HOST, BUCKET, "a.txt", None);
        assert!(url.ends_with("/o/a.txt?alt=media"));
    }

    #[test]
    fn url_round_trips_back_to_the_key() {
        for key in [
            "goods/20180101/image_label1.jpeg",
            "plain",
            "dir/",
            "spaces and ünïcode/파일 #1?.txt",
            "percent%2Fliteral",
        ] {
            let url = build_download_url(DEFAULT_STORAGE_HOST, BUCKET, key, Some("tok"));
            assert_eq!(parse_blob_key_from_url(&url).unwrap(), key);
        }
    }

    #[test]
    fn rejects_urls_without_a_key_segment() {
        assert!(matches!(
            parse_blob_key_from_url("not a url"),
            Err(HelperError::MalformedUrl(_))
        ));
        assert!(matches!(
            parse_blob_key_from_url("https://host/"),
            Err(HelperError::MalformedUrl(_))
        ));
        assert!(matches!(
            parse_blob_key_from_url("https://host/v0/b/x/o/%FF%FE"),
            Err(HelperError::MalformedUrl(_))
        ));
    }
}
