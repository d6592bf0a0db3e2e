//! The upload forms served over HTTP and the passes run on a parsed form.

pub mod item;
pub mod list;
pub mod media;

use crate::models::{ParsedForm, VariantSpec};
use serde_json::Value;

pub use item::{ResolvedItem, TagPlan, classify_tags, resolve_layout};
pub use list::ResolvedList;
pub use media::MediaRecord;

/// Animated images are stored as-is; re-encoding would keep only one frame.
pub const GIF_MIME: &str = "image/gif";

pub const LIST_COVER_VARIANTS: &[VariantSpec] = &[VariantSpec::width(300)];

/// Posters, covers and gallery images.
pub const IMAGE_VARIANTS: &[VariantSpec] = &[
    VariantSpec::width(300),
    VariantSpec::width(700),
    VariantSpec::ORIGINAL,
];

pub const LOGO_VARIANTS: &[VariantSpec] = &[VariantSpec::width(50)];

/// String members of a JSON array. Anything else is treated as empty.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn error_messages(form: &ParsedForm) -> Vec<String> {
    form.errors.iter().map(ToString::to_string).collect()
}
