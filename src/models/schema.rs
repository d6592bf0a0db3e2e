use super::{UploadSpec, VariantSpec};
use crate::config::FormLimits;
use crate::error::UploadError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// How a non-file field value is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Json,
}

impl FieldKind {
    pub fn decode(&self, name: &str, raw: String) -> Result<Value, UploadError> {
        match self {
            FieldKind::Text => Ok(Value::String(raw)),
            FieldKind::Json => serde_json::from_str(&raw).map_err(|e| {
                UploadError::MalformedBody(format!("field '{}' is not valid JSON: {}", name, e))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    Value(FieldKind),
    /// A file field. Repeated fields accept any `<name>[<token>]` part.
    File { spec: UploadSpec, repeated: bool },
}

/// Declarative description of one endpoint's form, fixed for the whole request.
#[derive(Debug, Clone)]
pub struct FormSchema {
    storage_dir: PathBuf,
    limits: FormLimits,
    skip_transform_for: BTreeSet<String>,
    rules: BTreeMap<String, FieldRule>,
}

impl FormSchema {
    pub fn new(storage_dir: impl Into<PathBuf>, limits: FormLimits) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            limits,
            skip_transform_for: BTreeSet::new(),
            rules: BTreeMap::new(),
        }
    }

    /// MIME types copied verbatim instead of transcoded, for every file field.
    /// Call before adding file fields.
    pub fn skip_transform_for<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_transform_for = mime_types
            .into_iter()
            .map(|m| m.into().to_lowercase())
            .collect();
        self
    }

    pub fn text(self, name: &str) -> Self {
        self.value(name, FieldKind::Text)
    }

    pub fn json(self, name: &str) -> Self {
        self.value(name, FieldKind::Json)
    }

    fn value(mut self, name: &str, kind: FieldKind) -> Self {
        self.rules.insert(name.to_string(), FieldRule::Value(kind));
        self
    }

    pub fn file(self, name: &str, prefix: Option<&str>, variants: &[VariantSpec]) -> Self {
        self.file_rule(name, prefix, variants, false)
    }

    /// A file field sent as `<name>[<token>]`, once per client token.
    pub fn repeated_file(self, name: &str, prefix: Option<&str>, variants: &[VariantSpec]) -> Self {
        self.file_rule(name, prefix, variants, true)
    }

    fn file_rule(
        mut self,
        name: &str,
        prefix: Option<&str>,
        variants: &[VariantSpec],
        repeated: bool,
    ) -> Self {
        let spec = UploadSpec {
            field_name: name.to_string(),
            storage_dir: self.storage_dir.clone(),
            name_prefix: prefix.map(str::to_string),
            variants: variants.to_vec(),
            skip_transform_for: self.skip_transform_for.clone(),
        };
        self.rules
            .insert(name.to_string(), FieldRule::File { spec, repeated });
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn limits(&self) -> FormLimits {
        self.limits
    }

    /// Rule for a part name. `logoPaths[abc]` matches a repeated `logoPaths` rule.
    pub fn rule_for(&self, part_name: &str) -> Option<&FieldRule> {
        if let Some(rule) = self.rules.get(part_name) {
            return Some(rule);
        }
        let (base, _) = split_token(part_name)?;
        match self.rules.get(base) {
            Some(rule @ FieldRule::File { repeated: true, .. }) => Some(rule),
            _ => None,
        }
    }

    pub fn upload_spec_for(&self, part_name: &str) -> Option<&UploadSpec> {
        match self.rule_for(part_name) {
            Some(FieldRule::File { spec, .. }) => Some(spec),
            _ => None,
        }
    }
}

/// Splits `name[token]` into `("name", "token")`.
pub fn split_token(part_name: &str) -> Option<(&str, &str)> {
    let open = part_name.find('[')?;
    let inner = part_name[open + 1..].strip_suffix(']')?;
    if open == 0 || inner.contains('[') {
        return None;
    }
    Some((&part_name[..open], inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FormSchema {
        FormSchema::new("/data/item", FormLimits::default())
            .skip_transform_for(["image/gif"])
            .text("title")
            .json("layout")
            .file("coverPath", Some("cover"), &[VariantSpec::width(300)])
            .repeated_file("logoPaths", Some("logo"), &[VariantSpec::width(50)])
    }

    #[test]
    fn test_split_token() {
        assert_eq!(split_token("logoPaths[abc]"), Some(("logoPaths", "abc")));
        assert_eq!(split_token("logoPaths[]"), Some(("logoPaths", "")));
        assert_eq!(split_token("logoPaths"), None);
        assert_eq!(split_token("[abc]"), None);
        assert_eq!(split_token("a[b[c]]"), None);
    }

    #[test]
    fn test_rule_lookup() {
        let schema = schema();
        assert_eq!(
            schema.rule_for("title"),
            Some(&FieldRule::Value(FieldKind::Text))
        );
        assert!(schema.upload_spec_for("coverPath").is_some());
        assert!(schema.upload_spec_for("coverPath[abc]").is_none());
        let logo = schema.upload_spec_for("logoPaths[abc]").unwrap();
        assert_eq!(logo.field_name, "logoPaths");
        assert_eq!(logo.name_prefix.as_deref(), Some("logo"));
        assert_eq!(logo.storage_dir, PathBuf::from("/data/item"));
        assert!(logo.skips_transform(Some("image/gif")));
        assert!(schema.rule_for("unknown").is_none());
    }

    #[test]
    fn test_json_field_decoding() {
        let value = FieldKind::Json.decode("layout", "[[1]]".into()).unwrap();
        assert_eq!(value, serde_json::json!([[1]]));
        assert!(matches!(
            FieldKind::Json.decode("layout", "{oops".into()),
            Err(UploadError::MalformedBody(_))
        ));
        assert_eq!(
            FieldKind::Text.decode("title", "{oops".into()).unwrap(),
            Value::String("{oops".into())
        );
    }
}
