use anyhow::{Result, anyhow};
use std::path::Path;

/// Longest extension carried over from a client file name, dot excluded.
const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Extension of a client-supplied file name, with its leading dot.
///
/// Only the final path component is considered. Anything that could not be a
/// plain extension (separators, control characters, overly long) yields "".
pub fn original_extension(file_name: &str) -> String {
    // Clients on Windows send backslash-separated paths
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or("");

    let Some(ext) = Path::new(last).extension().and_then(|e| e.to_str()) else {
        return String::new();
    };

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        tracing::debug!("Dropping unusable extension from '{}'", file_name);
        return String::new();
    }

    format!(".{}", ext)
}

/// Validates a path segment (list or item id) used to build a storage directory.
pub fn validate_path_segment(segment: &str) -> Result<&str> {
    if segment.is_empty() || segment.len() > 64 {
        return Err(anyhow!(ValidationError {
            code: "INVALID_ID",
            message: "Identifier must be between 1 and 64 characters".to_string(),
        }));
    }

    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Path traversal attempt detected: {}", segment);
        return Err(anyhow!(ValidationError {
            code: "INVALID_ID",
            message: format!("Identifier '{}' contains forbidden characters", segment),
        }));
    }

    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_extension() {
        assert_eq!(original_extension("photo.jpg"), ".jpg");
        assert_eq!(original_extension("archive.tar.gz"), ".gz");
        assert_eq!(original_extension("Photo.JPEG"), ".JPEG");
        assert_eq!(original_extension("no_extension"), "");
        assert_eq!(original_extension(""), "");
        assert_eq!(original_extension(".hidden"), "");

        // Path components are ignored
        assert_eq!(original_extension("../../etc/passwd"), "");
        assert_eq!(original_extension("..\\..\\dir.d\\img.png"), ".png");

        // Not a plain extension
        assert_eq!(original_extension("x.p;ng"), "");
        assert_eq!(original_extension("x.averyveryverylongext"), "");
    }

    #[test]
    fn test_validate_path_segment() {
        assert!(validate_path_segment("abc-123_X").is_ok());
        assert!(validate_path_segment("").is_err());
        assert!(validate_path_segment("..").is_err());
        assert!(validate_path_segment("a/b").is_err());
        assert!(validate_path_segment(&"a".repeat(65)).is_err());
    }
}
