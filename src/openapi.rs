use crate::models::{
    AddCommentRequest, ArtworkDetail, ArtworkPatch, ArtworkSummary, ArtworkType, AuthorArtworks, ChangeStatus,
    CommentCreated, CommentView, ImageFormat, PublishResponse, ReactionKind, ReactionStatus, ReactionView,
    SetReactionRequest, SetTitleRequest, Stream,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::upload_artwork,
        crate::routes::list_author_artworks,
        crate::routes::get_artwork,
        crate::routes::get_artwork_image,
        crate::routes::delete_artwork,
        crate::routes::set_title,
        crate::routes::update_artwork,
        crate::routes::set_reaction,
        crate::routes::remove_reaction,
        crate::routes::list_reactions,
        crate::routes::add_comment,
        crate::routes::delete_comment,
        crate::routes::list_comments,
        crate::routes::get_stream,
    ),
    components(schemas(
        ArtworkType, ImageFormat, ReactionKind, ChangeStatus,
        ArtworkSummary, ArtworkDetail, ArtworkPatch, Stream, AuthorArtworks,
        PublishResponse, SetTitleRequest, SetReactionRequest, ReactionStatus, ReactionView,
        AddCommentRequest, CommentCreated, CommentView,
    )),
    tags(
        (name = "artworks", description = "Publishing and catalog"),
        (name = "feed", description = "Two-cursor stream sync"),
        (name = "feedback", description = "Comments and reactions"),
    )
)]
pub struct ApiDoc;
