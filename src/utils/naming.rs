use crate::models::VariantSpec;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Sub-directory of a storage directory that holds derived copies.
pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Length of the random part of a generated name.
pub const RANDOM_SUFFIX_LEN: usize = 15;

/// Length of record ids minted during ingest (media, tags).
pub const LONG_ID_LEN: usize = 20;

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A fresh record id of [`LONG_ID_LEN`] alphanumeric characters.
pub fn generate_long_id() -> String {
    random_alphanumeric(LONG_ID_LEN)
}

/// Builds `[<prefix>_]<unix millis>_<random><extension>`.
///
/// The timestamp only orders names; uniqueness within a directory comes from
/// the random suffix, so two calls in the same millisecond still differ.
pub fn generate_stored_name(prefix: Option<&str>, extension: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = random_alphanumeric(RANDOM_SUFFIX_LEN);

    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}_{}_{}{}", prefix, millis, suffix, extension)
        }
        _ => format!("{}_{}{}", millis, suffix, extension),
    }
}

/// File name of a variant inside [`THUMBNAILS_DIR`].
pub fn variant_file_name(generated_name: &str, spec: &VariantSpec) -> String {
    if spec.is_resize() {
        format!("{}_size={}.webp", generated_name, spec)
    } else {
        format!("{}.webp", generated_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_name_shape() {
        let name = generate_stored_name(Some("cover"), ".jpg");
        let parts: Vec<&str> = name.trim_end_matches(".jpg").split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "cover");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), RANDOM_SUFFIX_LEN);
        assert!(name.ends_with(".jpg"));

        let bare = generate_stored_name(None, "");
        assert_eq!(bare.split('_').count(), 2);
        assert_eq!(generate_stored_name(Some(""), ".png").split('_').count(), 2);
    }

    #[test]
    fn test_names_unique_within_one_millisecond() {
        let names: HashSet<String> = (0..5000)
            .map(|_| generate_stored_name(Some("logo"), ".png"))
            .collect();
        assert_eq!(names.len(), 5000);
    }

    #[test]
    fn test_long_id() {
        let id = generate_long_id();
        assert_eq!(id.len(), LONG_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_long_id());
    }

    #[test]
    fn test_variant_file_names() {
        let name = "cover_1700000000000_abc.jpg";
        assert_eq!(
            variant_file_name(name, &VariantSpec::width(300)),
            "cover_1700000000000_abc.jpg_size=300xH.webp"
        );
        assert_eq!(
            variant_file_name(name, &VariantSpec::height(80)),
            "cover_1700000000000_abc.jpg_size=Wx80.webp"
        );
        assert_eq!(
            variant_file_name(name, &VariantSpec::ORIGINAL),
            "cover_1700000000000_abc.jpg.webp"
        );
    }
}
