use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FormSchema, ParsedForm};
use crate::services::forms::{self, MediaRecord, ResolvedItem, ResolvedList};
use crate::services::session::FormSession;
use crate::utils::validation::validate_path_segment;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use utoipa::{IntoParams, ToSchema};

/// Directory under the storage root that holds per-item gallery uploads.
pub const MEDIA_DIR: &str = "media";

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ItemUploadQuery {
    /// Comma-separated ids of the tags that already exist for the list
    pub known_tags: Option<String>,
}

impl ItemUploadQuery {
    fn known_tag_ids(&self) -> HashSet<String> {
        self.known_tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MediaUploadResponse {
    pub media: Option<MediaRecord>,
    pub errors: Vec<String>,
}

fn segment(value: &str) -> Result<&str, AppError> {
    validate_path_segment(value).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Runs one form session over the request body.
async fn run_form<F, Fut, T>(
    state: &AppState,
    schema: FormSchema,
    headers: &HeaderMap,
    body: Body,
    on_complete: F,
) -> Result<T, AppError>
where
    F: FnOnce(ParsedForm) -> Fut,
    Fut: Future<Output = T>,
{
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Expected a multipart/form-data body".to_string()))?;

    let mut session = FormSession::new(schema, state.writer.clone());
    let result = session
        .run(content_type, body.into_data_stream(), on_complete)
        .await?;
    Ok(result)
}

#[utoipa::path(
    post,
    path = "/lists/{list_id}",
    params(("list_id" = String, Path, description = "List identifier")),
    request_body(content = String, content_type = "multipart/form-data", description = "List form: title, configs, coverPath"),
    responses(
        (status = 200, description = "List form stored", body = ResolvedList),
        (status = 400, description = "Malformed form or limit exceeded"),
        (status = 413, description = "File too large")
    ),
    tag = "uploads"
)]
pub async fn upload_list(
    State(state): State<AppState>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ResolvedList>, AppError> {
    let dir = state.config.storage_root.join(segment(&list_id)?);
    let schema = forms::list::schema(&dir, &state.config.limits);

    let list = run_form(&state, schema, &headers, body, |form| async move {
        ResolvedList::from_parsed(&form)
    })
    .await?;

    tracing::info!("List {} form stored", list_id);
    Ok(Json(list))
}

#[utoipa::path(
    post,
    path = "/lists/{list_id}/items/{item_id}",
    params(
        ("list_id" = String, Path, description = "List identifier"),
        ("item_id" = String, Path, description = "Item identifier"),
        ItemUploadQuery
    ),
    request_body(content = String, content_type = "multipart/form-data", description = "Item form with poster, cover, logos and media images"),
    responses(
        (status = 200, description = "Item form stored", body = ResolvedItem),
        (status = 400, description = "Malformed form or limit exceeded"),
        (status = 413, description = "File too large")
    ),
    tag = "uploads"
)]
pub async fn upload_item(
    State(state): State<AppState>,
    Path((list_id, item_id)): Path<(String, String)>,
    Query(query): Query<ItemUploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ResolvedItem>, AppError> {
    let dir = state
        .config
        .storage_root
        .join(segment(&list_id)?)
        .join(segment(&item_id)?);
    let schema = forms::item::schema(&dir, &state.config.limits);
    let known_tags = query.known_tag_ids();

    let item = run_form(&state, schema, &headers, body, |form| async move {
        ResolvedItem::from_parsed(&form, &known_tags)
    })
    .await?;

    tracing::info!(
        "Item {}/{} form stored with {} media and {} new tag(s)",
        list_id,
        item_id,
        item.media.len(),
        item.tags.new_tags.len()
    );
    Ok(Json(item))
}

#[utoipa::path(
    post,
    path = "/items/{item_id}/media",
    params(("item_id" = String, Path, description = "Item identifier")),
    request_body(content = String, content_type = "multipart/form-data", description = "Gallery image with title and keywords"),
    responses(
        (status = 200, description = "Media stored", body = MediaUploadResponse),
        (status = 400, description = "Malformed form or limit exceeded"),
        (status = 413, description = "File too large")
    ),
    tag = "uploads"
)]
pub async fn upload_media(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<MediaUploadResponse>, AppError> {
    let dir = state
        .config
        .storage_root
        .join(MEDIA_DIR)
        .join(segment(&item_id)?);
    let schema = forms::media::schema(&dir, &state.config.limits);

    let response = run_form(&state, schema, &headers, body, |form| async move {
        MediaUploadResponse {
            media: forms::media::resolve(&form),
            errors: form.errors.iter().map(ToString::to_string).collect(),
        }
    })
    .await?;

    Ok(Json(response))
}
