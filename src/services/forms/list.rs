use super::{GIF_MIME, LIST_COVER_VARIANTS, error_messages};
use crate::config::FormLimits;
use crate::models::{FormSchema, ParsedForm};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use utoipa::ToSchema;

/// Limits of the list form. Counts are fixed by the form, sizes follow `base`.
pub fn limits(base: &FormLimits) -> FormLimits {
    FormLimits {
        max_fields: 2,
        max_files: 2,
        ..*base
    }
}

pub fn schema(dir: &Path, base: &FormLimits) -> FormSchema {
    FormSchema::new(dir, limits(base))
        .skip_transform_for([GIF_MIME])
        .text("title")
        .json("configs")
        .file("coverPath", Some("cover"), LIST_COVER_VARIANTS)
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedList {
    pub title: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub configs: Option<Value>,
    pub cover_path: Option<String>,
    pub errors: Vec<String>,
}

impl ResolvedList {
    pub fn from_parsed(form: &ParsedForm) -> Self {
        Self {
            title: form.text("title").map(str::to_string),
            configs: form.fields.get("configs").cloned(),
            cover_path: form.file_name("coverPath").map(str::to_string),
            errors: error_messages(form),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredFile;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn test_list_limits_keep_base_sizes() {
        let base = FormLimits {
            max_file_size: 7,
            ..FormLimits::default()
        };
        let limits = limits(&base);
        assert_eq!(limits.max_fields, 2);
        assert_eq!(limits.max_files, 2);
        assert_eq!(limits.max_file_size, 7);
    }

    #[test]
    fn test_schema_fields() {
        let schema = schema(Path::new("/data/list"), &FormLimits::default());
        let cover = schema.upload_spec_for("coverPath").unwrap();
        assert_eq!(cover.variants, LIST_COVER_VARIANTS);
        assert!(cover.skips_transform(Some(GIF_MIME)));
        assert!(schema.rule_for("title").is_some());
        assert!(schema.upload_spec_for("posterPath").is_none());
    }

    #[test]
    fn test_resolve_list() {
        let mut form = ParsedForm::default();
        form.fields.insert("title".into(), Value::String("Books".into()));
        form.placeholders.insert(
            "coverPath",
            StoredFile {
                generated_name: "cover_1_abc.png".into(),
                original_extension: ".png".into(),
                final_path: PathBuf::from("/data/list/cover_1_abc.png"),
                variant_paths: HashMap::new(),
            },
        );

        let list = ResolvedList::from_parsed(&form);
        assert_eq!(list.title.as_deref(), Some("Books"));
        assert_eq!(list.cover_path.as_deref(), Some("cover_1_abc.png"));
        assert!(list.configs.is_none());
        assert!(list.errors.is_empty());
    }
}
