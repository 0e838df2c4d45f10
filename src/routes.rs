use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt as _;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::Auth;
use crate::catalog::Catalog;
use crate::error::ApiError;
use crate::feed::{Cursor, FeedEngine};
use crate::feedback::Feedback;
use crate::models::*;
use crate::repo::Repo;
use crate::storage::BlobStore;
use crate::upload::{Upload, UploadError, UploadPipeline};
use crate::users::UserDirectory;

/// Text parts of the upload form are small; anything longer is malformed.
const TEXT_FIELD_LIMIT: usize = 4096;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/artworks")
            .route(web::get().to(list_author_artworks))
            .route(web::post().to(upload_artwork)),
    )
    .service(
        web::resource("/artworks/{id}")
            .route(web::patch().to(update_artwork))
            .route(web::delete().to(delete_artwork)),
    )
    .service(web::resource("/artworks/{id}/data").route(web::get().to(get_artwork)))
    .service(web::resource("/artworks/{id}/image").route(web::get().to(get_artwork_image)))
    .service(web::resource("/artworks/{id}/title").route(web::put().to(set_title)))
    .service(
        web::resource("/artworks/{id}/comments")
            .route(web::get().to(list_comments))
            .route(web::post().to(add_comment)),
    )
    .service(web::resource("/artworks/{id}/comments/{comment_id}").route(web::delete().to(delete_comment)))
    .service(web::resource("/artworks/{id}/reactions").route(web::get().to(list_reactions)))
    .service(
        web::resource("/artworks/{id}/reactions/{alias}")
            .route(web::put().to(set_reaction))
            .route(web::delete().to(remove_reaction)),
    )
    .service(web::resource("/users/{alias}/stream").route(web::get().to(get_stream)));
}

/// Shared handler state. Every component is built over the same injected stores.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub feed: FeedEngine,
    pub feedback: Feedback,
    pub uploads: UploadPipeline,
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repo>,
        users: Arc<dyn UserDirectory>,
        blobs: Arc<dyn BlobStore>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            catalog: Catalog::new(repo.clone(), users.clone(), blobs.clone()),
            feed: FeedEngine::new(repo.clone(), users.clone()),
            feedback: Feedback::new(repo.clone(), users.clone()),
            uploads: UploadPipeline::new(repo, blobs, max_upload_bytes),
            users,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// Lower bound of the client's trusted cache (RFC 3339).
    pub since: DateTime<Utc>,
    /// Newest item timestamp the client holds (RFC 3339).
    pub latest: DateTime<Utc>,
    /// Identity of the last item at `since`, for resuming inside a timestamp tie.
    pub since_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ArtistQuery {
    /// Author alias.
    pub artist: String,
    pub since: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub since_id: Option<String>,
}

fn bad_multipart(e: actix_multipart::MultipartError) -> ApiError {
    log::warn!("multipart error: {e}");
    ApiError::BadRequest("malformed multipart body".into())
}

async fn read_text(field: &mut Field) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(bad_multipart)? {
        if buf.len() + chunk.len() > TEXT_FIELD_LIMIT {
            return Err(ApiError::BadRequest("form field too long".into()));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ApiError::BadRequest("form field is not UTF-8".into()))
}

#[utoipa::path(
    post,
    path = "/artworks",
    tag = "artworks",
    responses(
        (status = 201, description = "Artwork published", body = PublishResponse),
        (status = 400, description = "Malformed form"),
        (status = 403, description = "Alias is not the caller"),
        (status = 409, description = "Same image already published"),
        (status = 413, description = "Payload too large"),
        (status = 415, description = "Unsupported image format"),
    )
)]
pub async fn upload_artwork(auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    let limit = data.uploads.max_bytes();
    let mut alias = None;
    let mut kind = ArtworkType::default();
    let mut title = None;
    let mut image: Option<Vec<u8>> = None;

    while let Some(mut field) = payload.try_next().await.map_err(bad_multipart)? {
        let name = field.content_disposition().and_then(|cd| cd.get_name()).unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let mut bytes = Vec::new();
                while let Some(chunk) = field.try_next().await.map_err(bad_multipart)? {
                    if bytes.len() + chunk.len() > limit {
                        return Err(UploadError::TooLarge { limit }.into());
                    }
                    bytes.extend_from_slice(&chunk);
                }
                image = Some(bytes);
            }
            "alias" => alias = Some(read_text(&mut field).await?),
            "type" => {
                kind = read_text(&mut field).await?
                    .parse()
                    .map_err(|e: ParseEnumError| ApiError::BadRequest(e.to_string()))?;
            }
            "title" => {
                let t = read_text(&mut field).await?;
                if !t.trim().is_empty() {
                    ArtworkPatch::title(t.as_str()).validate().map_err(ApiError::BadRequest)?;
                    title = Some(t);
                }
            }
            _ => while field.try_next().await.map_err(bad_multipart)?.is_some() {},
        }
    }

    let alias = alias.ok_or_else(|| ApiError::BadRequest("missing alias".into()))?;
    auth.ensure_alias(&alias)?;
    let bytes = image.ok_or_else(|| ApiError::BadRequest("missing image".into()))?;

    let published = data.uploads.publish(Upload { author: auth.0.id, kind, title, bytes }).await?;
    Ok(HttpResponse::Created().json(PublishResponse {
        id: published.id,
        updated: published.updated,
        format: published.format,
    }))
}

#[utoipa::path(
    get,
    path = "/users/{alias}/stream",
    tag = "feed",
    params(("alias" = String, Path, description = "Caller's own alias"), StreamQuery),
    responses(
        (status = 200, description = "Feed window", body = Stream),
        (status = 403, description = "Alias is not the caller"),
    )
)]
pub async fn get_stream(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<StreamQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.ensure_alias(&path)?;
    let q = query.into_inner();
    let cursor = Cursor { since: q.since, latest: q.latest, since_id: q.since_id };
    let stream = data.feed.stream(auth.0.id, &cursor).await?;
    Ok(HttpResponse::Ok().json(stream))
}

#[utoipa::path(
    get,
    path = "/artworks",
    tag = "feed",
    params(ArtistQuery),
    responses(
        (status = 200, description = "One author's artworks", body = AuthorArtworks),
        (status = 404, description = "Unknown or hidden author"),
    )
)]
pub async fn list_author_artworks(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ArtistQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let cursor = Cursor { since: q.since, latest: q.latest, since_id: q.since_id };
    let page = data.feed.author_artworks(auth.0.id, &q.artist, &cursor).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/artworks/{id}/data",
    tag = "artworks",
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 200, description = "Artwork metadata", body = ArtworkDetail),
        (status = 404, description = "Not found"),
    )
)]
pub async fn get_artwork(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let detail = data.catalog.get(&path, auth.0.id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    get,
    path = "/artworks/{id}/image",
    tag = "artworks",
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 200, description = "Image bytes", content_type = "image/*"),
        (status = 404, description = "Not found"),
    )
)]
pub async fn get_artwork_image(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let (bytes, format) = data.catalog.image(&path, auth.0.id).await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, format.mime()))
        // content-addressed: the bytes behind an id never change
        .insert_header((header::CACHE_CONTROL, "private, max-age=31536000, immutable"))
        .body(bytes))
}

#[utoipa::path(
    delete,
    path = "/artworks/{id}",
    tag = "artworks",
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 204, description = "Artwork deleted"),
        (status = 404, description = "Not found or not owned"),
    )
)]
pub async fn delete_artwork(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    data.catalog.delete(&path, auth.0.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    put,
    path = "/artworks/{id}/title",
    tag = "artworks",
    request_body = SetTitleRequest,
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 204, description = "Title changed"),
        (status = 400, description = "Invalid title"),
        (status = 404, description = "Not modified: missing, deleted or not owned"),
    )
)]
pub async fn set_title(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetTitleRequest>,
) -> Result<HttpResponse, ApiError> {
    match data.catalog.set_title(&path, auth.0.id, &body.title).await? {
        Change::Changed(_) => Ok(HttpResponse::NoContent().finish()),
        Change::Unchanged => Err(ApiError::NotFound),
    }
}

#[utoipa::path(
    patch,
    path = "/artworks/{id}",
    tag = "artworks",
    request_body = ArtworkPatch,
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 200, description = "Artwork updated", body = ArtworkDetail),
        (status = 400, description = "Invalid field"),
        (status = 404, description = "Not modified: missing, deleted or not owned"),
    )
)]
pub async fn update_artwork(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ArtworkPatch>,
) -> Result<HttpResponse, ApiError> {
    match data.catalog.update(&path, auth.0.id, &body).await? {
        Change::Changed(_) => Ok(HttpResponse::Ok().json(data.catalog.get(&path, auth.0.id).await?)),
        Change::Unchanged => Err(ApiError::NotFound),
    }
}

#[utoipa::path(
    put,
    path = "/artworks/{id}/reactions/{alias}",
    tag = "feedback",
    request_body = SetReactionRequest,
    params(
        ("id" = String, Path, description = "Content hash"),
        ("alias" = String, Path, description = "Caller's own alias"),
    ),
    responses(
        (status = 200, description = "Reaction stored or already present", body = ReactionStatus),
        (status = 403, description = "Alias is not the caller"),
        (status = 404, description = "Artwork not found"),
    )
)]
pub async fn set_reaction(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<SetReactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let (id, alias) = path.into_inner();
    auth.ensure_alias(&alias)?;
    let change = data.feedback.set_reaction(&id, auth.0.id, body.reaction).await?;
    Ok(HttpResponse::Ok().json(ReactionStatus::from(change)))
}

#[utoipa::path(
    delete,
    path = "/artworks/{id}/reactions/{alias}",
    tag = "feedback",
    params(
        ("id" = String, Path, description = "Content hash"),
        ("alias" = String, Path, description = "Caller's own alias"),
    ),
    responses(
        (status = 204, description = "Reaction removed"),
        (status = 403, description = "Alias is not the caller"),
        (status = 404, description = "No reaction to remove"),
    )
)]
pub async fn remove_reaction(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (id, alias) = path.into_inner();
    auth.ensure_alias(&alias)?;
    data.feedback.remove_reaction(&id, auth.0.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/artworks/{id}/reactions",
    tag = "feedback",
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 200, description = "Reactions, newest first", body = [ReactionView]),
        (status = 404, description = "Not found"),
    )
)]
pub async fn list_reactions(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.feedback.reactions(&path, auth.0.id).await?))
}

#[utoipa::path(
    post,
    path = "/artworks/{id}/comments",
    tag = "feedback",
    request_body = AddCommentRequest,
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 201, description = "Comment created", body = CommentCreated),
        (status = 400, description = "Comment length out of bounds"),
        (status = 404, description = "Artwork not found"),
    )
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AddCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.feedback.add_comment(&path, auth.0.id, body.into_inner().comment).await?;
    Ok(HttpResponse::Created().json(CommentCreated { id: comment.id, date: comment.date }))
}

#[utoipa::path(
    delete,
    path = "/artworks/{id}/comments/{comment_id}",
    tag = "feedback",
    params(
        ("id" = String, Path, description = "Content hash"),
        ("comment_id" = Uuid, Path, description = "Comment id"),
    ),
    responses(
        (status = 204, description = "Comment deleted"),
        (status = 404, description = "Not found or not owned"),
    )
)]
pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (id, comment_id) = path.into_inner();
    data.feedback.delete_comment(&id, comment_id, auth.0.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/artworks/{id}/comments",
    tag = "feedback",
    params(("id" = String, Path, description = "Content hash")),
    responses(
        (status = 200, description = "Comments, newest first", body = [CommentView]),
        (status = 404, description = "Not found"),
    )
)]
pub async fn list_comments(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.feedback.comments(&path, auth.0.id).await?))
}
