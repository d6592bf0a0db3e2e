pub mod schema;

use crate::error::UploadError;
use crate::utils::naming::{THUMBNAILS_DIR, variant_file_name};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

pub use schema::{FieldKind, FieldRule, FormSchema};

/// Target dimensions of one derived copy. No dimensions means re-encode only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariantSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VariantSpec {
    /// The canonical, original-size derived copy.
    pub const ORIGINAL: VariantSpec = VariantSpec {
        width: None,
        height: None,
    };

    pub const fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            height: None,
        }
    }

    pub const fn height(height: u32) -> Self {
        Self {
            width: None,
            height: Some(height),
        }
    }

    pub const fn sized(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    pub fn is_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Path of this variant relative to the storage directory.
    pub fn relative_path(&self, generated_name: &str) -> PathBuf {
        Path::new(THUMBNAILS_DIR).join(variant_file_name(generated_name, self))
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            Some(w) => write!(f, "{}", w)?,
            None => f.write_str("W")?,
        }
        f.write_str("x")?;
        match self.height {
            Some(h) => write!(f, "{}", h),
            None => f.write_str("H"),
        }
    }
}

/// Everything the fan-out needs to store one file field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSpec {
    pub field_name: String,
    pub storage_dir: PathBuf,
    pub name_prefix: Option<String>,
    pub variants: Vec<VariantSpec>,
    pub skip_transform_for: BTreeSet<String>,
}

impl UploadSpec {
    /// Whether files of this MIME type are copied verbatim instead of transcoded.
    pub fn skips_transform(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        self.skip_transform_for.contains(&essence)
    }
}

/// One destination of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Original,
    Variant(VariantSpec),
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Original => f.write_str("original"),
            Branch::Variant(spec) => write!(f, "variant {}", spec),
        }
    }
}

#[derive(Debug)]
pub struct BranchError {
    pub branch: Branch,
    pub error: UploadError,
}

/// A failure recorded against one attachment. `branch` is `None` when the
/// file never reached the fan-out.
#[derive(Debug)]
pub struct AttachmentError {
    pub key: String,
    pub branch: Option<Branch>,
    pub error: UploadError,
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch {
            Some(branch) => write!(f, "{} ({}): {}", self.key, branch, self.error),
            None => write!(f, "{}: {}", self.key, self.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// File name inside the storage directory, extension included.
    pub generated_name: String,
    /// Extension taken from the client file name, with its leading dot, or empty.
    pub original_extension: String,
    pub final_path: PathBuf,
    pub variant_paths: HashMap<VariantSpec, PathBuf>,
}

/// Client token key (e.g. `logoPaths[abc]`) to the file stored for it.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderMap {
    entries: HashMap<String, StoredFile>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, file: StoredFile) {
        self.entries.insert(key.into(), file);
    }

    pub fn get(&self, key: &str) -> Option<&StoredFile> {
        self.entries.get(key)
    }

    /// Looks up `<field>[<token>]`.
    pub fn resolve(&self, field: &str, token: &str) -> Option<&StoredFile> {
        self.entries.get(&format!("{}[{}]", field, token))
    }

    /// Stored name for `<field>[<token>]`, or the caller's fallback when nothing was attached.
    pub fn resolve_or<'a>(&'a self, field: &str, token: &str, fallback: &'a str) -> &'a str {
        self.resolve(field, token)
            .map(|file| file.generated_name.as_str())
            .unwrap_or(fallback)
    }

    /// Key to stored file name, the form later passes use for substitution.
    pub fn names(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(key, file)| (key.clone(), file.generated_name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a completed form session.
#[derive(Debug, Default)]
pub struct ParsedForm {
    pub fields: BTreeMap<String, Value>,
    pub files: Vec<StoredFile>,
    pub placeholders: PlaceholderMap,
    pub errors: Vec<AttachmentError>,
}

impl ParsedForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Deserializes a field. A missing field is `Ok(None)`.
    pub fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, UploadError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| UploadError::MalformedBody(format!("field '{}': {}", name, e))),
        }
    }

    /// Stored name of the file uploaded under `key`, if any.
    pub fn file_name(&self, key: &str) -> Option<&str> {
        self.placeholders
            .get(key)
            .map(|file| file.generated_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str) -> StoredFile {
        StoredFile {
            generated_name: name.to_string(),
            original_extension: ".png".to_string(),
            final_path: PathBuf::from("/tmp").join(name),
            variant_paths: HashMap::new(),
        }
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(VariantSpec::width(300).to_string(), "300xH");
        assert_eq!(VariantSpec::height(120).to_string(), "Wx120");
        assert_eq!(VariantSpec::sized(50, 60).to_string(), "50x60");
        assert_eq!(VariantSpec::ORIGINAL.to_string(), "WxH");
        assert!(!VariantSpec::ORIGINAL.is_resize());
    }

    #[test]
    fn test_skips_transform_normalizes_mime() {
        let spec = UploadSpec {
            field_name: "cover".into(),
            storage_dir: PathBuf::from("/tmp"),
            name_prefix: None,
            variants: vec![VariantSpec::width(300)],
            skip_transform_for: BTreeSet::from(["image/gif".to_string()]),
        };
        assert!(spec.skips_transform(Some("image/gif")));
        assert!(spec.skips_transform(Some("Image/GIF; charset=binary")));
        assert!(!spec.skips_transform(Some("image/png")));
        assert!(!spec.skips_transform(None));
    }

    #[test]
    fn test_placeholder_resolution_falls_back() {
        let mut map = PlaceholderMap::new();
        map.insert("logoPaths[abc]", stored("logo_1_x.png"));

        assert_eq!(map.resolve_or("logoPaths", "abc", "abc"), "logo_1_x.png");
        assert_eq!(map.resolve_or("logoPaths", "zzz", "zzz"), "zzz");
        assert!(map.resolve("mediaImages", "abc").is_none());
        assert_eq!(map.names()["logoPaths[abc]"], "logo_1_x.png");
    }

    #[test]
    fn test_parsed_form_json_field() {
        let mut form = ParsedForm::default();
        form.fields
            .insert("tags".into(), serde_json::json!(["a", "b"]));
        form.fields.insert("title".into(), Value::String("T".into()));

        let tags: Option<Vec<String>> = form.json("tags").unwrap();
        assert_eq!(tags.unwrap(), vec!["a", "b"]);
        assert_eq!(form.text("title"), Some("T"));
        assert!(form.json::<Vec<String>>("missing").unwrap().is_none());
        assert!(form.json::<Vec<String>>("title").is_err());
    }
}
