//! Content classification: sniff a MIME type from local file content and map
//! MIME types to canonical file extensions.

/// Number of leading bytes handed to [`ContentClassifier::detect`].
pub const SNIFF_LEN: usize = 512;

/// Black-box content classifier used for uploads and extension fallback.
pub trait ContentClassifier: Send + Sync {
    /// Guess the MIME type from the first bytes of a file and its name.
    ///
    /// `None` when nothing can be inferred.
    fn detect(&self, header: &[u8], file_name: &str) -> Option<String>;

    /// Canonical extension (without the dot) for a MIME type.
    fn extension_for(&self, mime_type: &str) -> Option<String>;
}

/// MIME type, canonical extension, and any extra extensions that map back.
const REGISTRY: &[(&str, &str, &[&str])] = &[
    ("image/jpeg", "jpeg", &["jpg", "jpe"]),
    ("image/png", "png", &[]),
    ("image/gif", "gif", &[]),
    ("image/webp", "webp", &[]),
    ("image/bmp", "bmp", &[]),
    ("image/svg+xml", "svg", &[]),
    ("image/tiff", "tiff", &["tif"]),
    ("image/x-icon", "ico", &[]),
    ("video/mp4", "mp4", &["m4v"]),
    ("video/webm", "webm", &[]),
    ("video/quicktime", "mov", &[]),
    ("audio/mpeg", "mp3", &[]),
    ("audio/wav", "wav", &[]),
    ("audio/ogg", "ogg", &[]),
    ("audio/flac", "flac", &[]),
    ("application/pdf", "pdf", &[]),
    ("application/zip", "zip", &[]),
    ("application/gzip", "gz", &["tgz"]),
    ("application/x-tar", "tar", &[]),
    ("application/json", "json", &[]),
    ("application/xml", "xml", &[]),
    ("application/msword", "doc", &[]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
        &[],
    ),
    ("application/vnd.ms-excel", "xls", &[]),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
        &[],
    ),
    ("application/vnd.ms-powerpoint", "ppt", &[]),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
        &[],
    ),
    ("application/octet-stream", "bin", &[]),
    ("text/plain", "txt", &["text", "log"]),
    ("text/csv", "csv", &[]),
    ("text/html", "html", &["htm"]),
    ("text/css", "css", &[]),
    ("text/javascript", "js", &["mjs"]),
];

/// Leading byte signatures and the MIME type they identify.
const SIGNATURES: &[(&[u8], &str)] = &[
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"%PDF-", "application/pdf"),
    (&[0x1F, 0x8B], "application/gzip"),
    (b"ID3", "audio/mpeg"),
    (b"fLaC", "audio/flac"),
    (b"OggS", "audio/ogg"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "video/webm"),
];

/// Strip parameters from a MIME type ("text/plain; charset=utf-8" -> "text/plain").
pub fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Static MIME registry with magic-number sniffing.
#[derive(Clone, Copy, Debug, Default)]
pub struct MimeRegistry;

impl MimeRegistry {
    fn sniff(header: &[u8]) -> Option<&'static str> {
        if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| header.starts_with(sig)) {
            return Some(mime);
        }

        // RIFF containers: WEBP / WAVE
        if header.len() >= 12 && header.starts_with(b"RIFF") {
            match &header[8..12] {
                b"WEBP" => return Some("image/webp"),
                b"WAVE" => return Some("audio/wav"),
                _ => {}
            }
        }

        // ISO base media: ....ftyp
        if header.len() >= 12 && &header[4..8] == b"ftyp" {
            return Some(if &header[8..12] == b"qt  " {
                "video/quicktime"
            } else {
                "video/mp4"
            });
        }

        None
    }

    fn from_file_name(file_name: &str) -> Option<&'static str> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        let ext = ext.to_ascii_lowercase();
        REGISTRY
            .iter()
            .find(|(_, canonical, aliases)| *canonical == ext || aliases.contains(&ext.as_str()))
            .map(|(mime, _, _)| *mime)
    }

    fn looks_like_text(header: &[u8]) -> bool {
        !header.is_empty()
            && !header.contains(&0)
            && match std::str::from_utf8(header) {
                Ok(_) => true,
                // A multi-byte sequence cut off by the sniff window.
                Err(err) => err.error_len().is_none(),
            }
    }
}

impl ContentClassifier for MimeRegistry {
    fn detect(&self, header: &[u8], file_name: &str) -> Option<String> {
        if let Some(mime) = Self::sniff(header) {
            return Some(mime.to_string());
        }

        // Zip-based office formats are only told apart by name.
        if header.starts_with(b"PK\x03\x04") {
            let named = Self::from_file_name(file_name)
                .filter(|mime| mime.starts_with("application/vnd.openxml"));
            return Some(named.unwrap_or("application/zip").to_string());
        }

        if let Some(mime) = Self::from_file_name(file_name) {
            return Some(mime.to_string());
        }

        if Self::looks_like_text(header) {
            return Some("text/plain".to_string());
        }

        None
    }

    fn extension_for(&self, mime_type: &str) -> Option<String> {
        let normalized = normalize_mime_type(mime_type);
        REGISTRY
            .iter()
            .find(|(mime, _, _)| *mime == normalized)
            .map(|(_, ext, _)| ext.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_mime_types_to_extensions() {
        let registry = MimeRegistry;
        assert_eq!(registry.extension_for("image/jpeg").as_deref(), Some("jpeg"));
        assert_eq!(registry.extension_for("application/gzip").as_deref(), Some("gz"));
        assert_eq!(
            registry
                .extension_for("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
                .as_deref(),
            Some("xlsx")
        );
        assert_eq!(
            registry.extension_for("Text/Plain; charset=utf-8").as_deref(),
            Some("txt")
        );
        assert_eq!(registry.extension_for("application/x-unheard-of"), None);
    }

    #[test]
    fn detects_by_magic_number_before_name() {
        let registry = MimeRegistry;
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        assert_eq!(registry.detect(&jpeg, "photo.png").as_deref(), Some("image/jpeg"));

        let webp = *b"RIFF\x00\x00\x00\x00WEBPVP8 ";
        assert_eq!(registry.detect(&webp, "x").as_deref(), Some("image/webp"));
    }

    #[test]
    fn falls_back_to_name_then_text() {
        let registry = MimeRegistry;
        assert_eq!(
            registry.detect(b"a,b\n1,2\n", "table.csv").as_deref(),
            Some("text/csv")
        );
        assert_eq!(
            registry.detect(b"PK\x03\x04rest", "sheet.xlsx").as_deref(),
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        );
        assert_eq!(
            registry.detect(b"PK\x03\x04rest", "bundle").as_deref(),
            Some("application/zip")
        );
        assert_eq!(registry.detect(b"just words", "notes").as_deref(), Some("text/plain"));
        assert_eq!(registry.detect(&[0x00, 0x01, 0x02], "blob"), None);
        assert_eq!(registry.detect(&[], "empty"), None);
    }
}
