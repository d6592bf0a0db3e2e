use super::{GIF_MIME, IMAGE_VARIANTS, string_list};
use crate::config::FormLimits;
use crate::models::{FormSchema, ParsedForm};
use crate::utils::naming::generate_long_id;
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

/// A gallery image attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MediaRecord {
    pub id: String,
    pub path: String,
    pub title: Option<String>,
    pub keywords: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MediaRecord {
    pub fn image(path: String, title: Option<String>, keywords: Vec<String>) -> Self {
        Self {
            id: generate_long_id(),
            path,
            title: title.filter(|t| !t.is_empty()),
            keywords,
            kind: "image".to_string(),
        }
    }
}

/// A single gallery upload: one image with its title and keywords.
pub fn schema(dir: &Path, base: &FormLimits) -> FormSchema {
    FormSchema::new(
        dir,
        FormLimits {
            max_fields: 2,
            max_files: 1,
            ..*base
        },
    )
    .skip_transform_for([GIF_MIME])
    .text("title")
    .json("keywords")
    .file("path", None, IMAGE_VARIANTS)
}

/// `None` when no image was stored.
pub fn resolve(form: &ParsedForm) -> Option<MediaRecord> {
    let path = form.file_name("path")?;
    Some(MediaRecord::image(
        path.to_string(),
        form.text("title").map(str::to_string),
        string_list(form.fields.get("keywords")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredFile;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn test_record_serializes_type() {
        let record = MediaRecord::image("a.png".into(), Some(String::new()), vec![]);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["title"], serde_json::Value::Null);
        assert_eq!(record.id.len(), 20);
    }

    #[test]
    fn test_resolve_requires_a_file() {
        let mut form = ParsedForm::default();
        form.fields.insert("keywords".into(), json!(["sea", "sky"]));
        assert!(resolve(&form).is_none());

        form.placeholders.insert(
            "path",
            StoredFile {
                generated_name: "1_abc.jpg".into(),
                original_extension: ".jpg".into(),
                final_path: PathBuf::from("/d/1_abc.jpg"),
                variant_paths: HashMap::new(),
            },
        );
        let record = resolve(&form).unwrap();
        assert_eq!(record.path, "1_abc.jpg");
        assert_eq!(record.keywords, vec!["sea", "sky"]);
    }
}
