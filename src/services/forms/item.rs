use super::media::MediaRecord;
use super::{GIF_MIME, IMAGE_VARIANTS, LOGO_VARIANTS, error_messages, string_list};
use crate::config::FormLimits;
use crate::models::{FormSchema, ParsedForm};
use crate::utils::naming::{LONG_ID_LEN, generate_long_id};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use utoipa::ToSchema;

const LOGO_FIELD: &str = "logoPaths";
const MEDIA_FIELD: &str = "mediaImages";

pub fn limits(base: &FormLimits) -> FormLimits {
    FormLimits {
        max_fields: 9,
        max_files: 50,
        ..*base
    }
}

pub fn schema(dir: &Path, base: &FormLimits) -> FormSchema {
    FormSchema::new(dir, limits(base))
        .skip_transform_for([GIF_MIME])
        .text("title")
        .text("description")
        .json("layout")
        .json("tags")
        .json("media")
        .json("configs")
        .json("copyright")
        .json("header")
        .file("posterPath", Some("poster"), IMAGE_VARIANTS)
        .file("coverPath", Some("cover"), IMAGE_VARIANTS)
        .repeated_file(LOGO_FIELD, Some("logo"), LOGO_VARIANTS)
        .repeated_file(MEDIA_FIELD, None, IMAGE_VARIANTS)
}

/// A gallery entry as the client describes it; `path` is the upload token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub keywords: Value,
}

/// Creates a record for every entry whose image was uploaded, then points
/// its `mediaImages[<token>]` substitution at the new record id.
pub fn media_records(entries: &[MediaEntry], names: &mut HashMap<String, String>) -> Vec<MediaRecord> {
    let mut consumed = HashSet::new();
    let mut records = Vec::new();

    for entry in entries {
        let key = format!("{}[{}]", MEDIA_FIELD, entry.path);
        if consumed.contains(&key) {
            continue;
        }
        let Some(path) = names.get(&key).cloned() else {
            continue;
        };

        let record = MediaRecord::image(
            path,
            entry.title.clone(),
            string_list(Some(&entry.keywords)),
        );
        names.insert(key.clone(), record.id.clone());
        consumed.insert(key);
        records.push(record);
    }

    records
}

/// Substitutes upload tokens in a layout (tabs of rows of fields).
///
/// The first row of every tab is its header and is returned untouched. In
/// other rows `logoPath` and `imageId` tokens are replaced when an upload
/// exists for them, and every field loses its client-side `id`.
pub fn resolve_layout(layout: &Value, names: &HashMap<String, String>) -> Value {
    let Value::Array(tabs) = layout else {
        return Value::Array(Vec::new());
    };

    let tabs = tabs
        .iter()
        .map(|tab| match tab {
            Value::Array(rows) => Value::Array(
                rows.iter()
                    .enumerate()
                    .map(|(i, row)| {
                        if i == 0 {
                            row.clone()
                        } else {
                            resolve_row(row, names)
                        }
                    })
                    .collect(),
            ),
            other => other.clone(),
        })
        .collect();

    Value::Array(tabs)
}

fn resolve_row(row: &Value, names: &HashMap<String, String>) -> Value {
    match row {
        Value::Array(fields) => Value::Array(
            fields
                .iter()
                .map(|field| match field {
                    Value::Object(map) => Value::Object(resolve_field(map, names)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_field(field: &Map<String, Value>, names: &HashMap<String, String>) -> Map<String, Value> {
    let mut field = field.clone();
    field.remove("id");

    let substitution = [("logoPath", LOGO_FIELD), ("imageId", MEDIA_FIELD)]
        .into_iter()
        .find_map(|(attr, upload_field)| {
            let token = field.get(attr)?.as_str().filter(|t| !t.is_empty())?;
            Some((attr, names.get(&format!("{}[{}]", upload_field, token)).cloned()))
        });

    if let Some((attr, Some(resolved))) = substitution {
        field.insert(attr.to_string(), Value::String(resolved));
    }
    field
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct NewTag {
    pub id: String,
    pub label: String,
}

/// Tags to attach to an item, and the labels that need a tag created first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagPlan {
    /// Final tag ids: known ids first, then the ids minted for new labels.
    pub tags: Vec<String>,
    pub new_tags: Vec<NewTag>,
}

/// Splits requested tags into existing ids and new labels.
///
/// Ids are exactly [`LONG_ID_LEN`] characters, so anything else is a label.
/// A label that happens to have that length is still a label unless it
/// matches a known id.
pub fn classify_tags(requested: &[String], known_ids: &HashSet<String>) -> TagPlan {
    let mut plan = TagPlan::default();
    let mut labels = Vec::new();

    for tag in requested {
        if tag.chars().count() == LONG_ID_LEN && known_ids.contains(tag) {
            plan.tags.push(tag.clone());
        } else {
            labels.push(tag.clone());
        }
    }

    for label in labels {
        let id = generate_long_id();
        plan.tags.push(id.clone());
        plan.new_tags.push(NewTag { id, label });
    }

    plan
}

/// An item form with every upload token resolved.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub poster_path: Option<String>,
    pub cover_path: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub layout: Value,
    pub media: Vec<MediaRecord>,
    pub tags: TagPlan,
    #[schema(value_type = Option<Object>)]
    pub configs: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub copyright: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub header: Option<Value>,
    pub errors: Vec<String>,
}

impl ResolvedItem {
    /// Media are resolved before the layout so `imageId` tokens land on
    /// media ids rather than file names.
    pub fn from_parsed(form: &ParsedForm, known_tag_ids: &HashSet<String>) -> Self {
        let mut names = form.placeholders.names();

        let entries: Vec<MediaEntry> = match form.fields.get("media") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        };
        let media = media_records(&entries, &mut names);

        let layout = form
            .fields
            .get("layout")
            .map(|layout| resolve_layout(layout, &names))
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let tags = classify_tags(&string_list(form.fields.get("tags")), known_tag_ids);

        Self {
            title: form.text("title").map(str::to_string),
            description: form.text("description").map(str::to_string),
            poster_path: form.file_name("posterPath").map(str::to_string),
            cover_path: form.file_name("coverPath").map(str::to_string),
            layout,
            media,
            tags,
            configs: form.fields.get("configs").cloned(),
            copyright: form.fields.get("copyright").cloned(),
            header: form.fields.get("header").cloned(),
            errors: error_messages(form),
        }
    }
}
