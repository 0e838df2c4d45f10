#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use atelier::models::User;
use atelier::repo::inmem::InMemRepo;
use atelier::routes::{config, AppState};
use atelier::storage::FsBlobStore;
use atelier::upload::DEFAULT_MAX_UPLOAD_BYTES;
use atelier::users::inmem::InMemUsers;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

// Helper to build a multipart body from (name, optional filename, bytes) parts
fn build_multipart(parts: &[(&str, Option<&str>, &[u8])], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    for (name, file_name, bytes) in parts {
        let disp = match file_name {
            Some(f) => format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            ),
            None => format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n"),
        };
        body.extend_from_slice(disp.as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

// Minimal 1x1 PNG (transparent)
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

// JFIF header is enough for sniffing
fn sample_jpeg() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0xFF, 0xD9]
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn bearer(u: &User) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", u.id))
}

struct Setup {
    _dir: tempfile::TempDir,
    state: AppState,
    artist: User,
    fan: User,
}

async fn setup(max_upload: usize) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let users = InMemUsers::new();
    let artist = users.add_user("artist", "Artist").unwrap();
    let fan = users.add_user("fan", "Fan").unwrap();
    users.follow(fan.id, artist.id).unwrap();
    let blobs = FsBlobStore::new(dir.path()).await.unwrap();
    let state = AppState::new(Arc::new(InMemRepo::new()), Arc::new(users), Arc::new(blobs), max_upload);
    Setup { _dir: dir, state, artist, fan }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data(web::Data::new($state.clone())).configure(config)).await
    };
}

#[actix_web::test]
async fn publish_sync_and_delete_flow() {
    let s = setup(DEFAULT_MAX_UPLOAD_BYTES).await;
    let app = app!(s.state);
    let before = ts(Utc::now() - Duration::minutes(1));

    // publish
    let png = sample_png();
    let (ct, body) = build_multipart(
        &[("alias", None, b"artist".as_slice()), ("type", None, b"Drawing".as_slice()), ("title", None, b"Sketch".as_slice()), ("image", Some("x.bin"), png.as_slice())],
        "XBOUNDARY",
    );
    let req = test::TestRequest::post()
        .uri("/artworks")
        .insert_header(bearer(&s.artist))
        .insert_header(("Content-Type", ct.clone()))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let published: Value = test::read_body_json(resp).await;
    let id = published["Id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 64);
    assert_eq!(published["Format"], "png");

    // same bytes again → conflict
    let req = test::TestRequest::post()
        .uri("/artworks")
        .insert_header(bearer(&s.artist))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // the fan's stream reports it as new
    let now = ts(Utc::now() + Duration::seconds(1));
    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={now}&latest={before}"))
        .insert_header(bearer(&s.fan))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let stream: Value = test::read_body_json(resp).await;
    assert_eq!(stream["Artworks"].as_array().unwrap().len(), 0);
    let new = stream["NewArtworks"].as_array().unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(new[0]["Id"], id.as_str());
    assert_eq!(new[0]["AuthorAlias"], "artist");
    assert_eq!(new[0]["Title"], "Sketch");
    let added = new[0]["Added"].as_str().unwrap().to_string();

    // metadata and image
    let req = test::TestRequest::get().uri(&format!("/artworks/{id}/data")).insert_header(bearer(&s.fan)).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["Type"], "Drawing");
    let req = test::TestRequest::get().uri(&format!("/artworks/{id}/image")).insert_header(bearer(&s.fan)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("Content-Type").unwrap(), "image/png");
    assert!(resp.headers().get("Cache-Control").unwrap().to_str().unwrap().contains("immutable"));
    assert_eq!(test::read_body(resp).await.as_ref(), png.as_slice());

    // only the owner can delete
    let req = test::TestRequest::delete().uri(&format!("/artworks/{id}")).insert_header(bearer(&s.fan)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::delete().uri(&format!("/artworks/{id}")).insert_header(bearer(&s.artist)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // a client holding it gets the tombstone
    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={now}&latest={before}"))
        .insert_header(bearer(&s.fan))
        .to_request();
    let stream: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(stream["DeletedIds"], serde_json::json!([id]));
    assert_eq!(stream["NewArtworks"].as_array().unwrap().len(), 0);

    // a client already past it does not
    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={now}&latest={}", added.replace('+', "%2B")))
        .insert_header(bearer(&s.fan))
        .to_request();
    let stream: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(stream["DeletedIds"].as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn upload_validation_statuses() {
    let s = setup(64).await;
    let app = app!(s.state);

    let post = |parts: &[(&str, Option<&str>, &[u8])], who: &User| {
        let (ct, body) = build_multipart(parts, "B0UNDARY");
        test::TestRequest::post()
            .uri("/artworks")
            .insert_header(bearer(who))
            .insert_header(("Content-Type", ct))
            .set_payload(body)
            .to_request()
    };

    let text = b"this is text, not an image".to_vec();
    let resp = test::call_service(&app, post(&[("alias", None, b"artist".as_slice()), ("image", Some("a.png"), text.as_slice())], &s.artist)).await;
    assert_eq!(resp.status(), 415);
    let err: Value = test::read_body_json(resp).await;
    assert!(err["error"].as_str().unwrap().contains("image/jpeg, image/png, image/webp"));

    let big = [sample_png(), vec![0u8; 128]].concat();
    let resp = test::call_service(&app, post(&[("alias", None, b"artist".as_slice()), ("image", Some("a.png"), big.as_slice())], &s.artist)).await;
    assert_eq!(resp.status(), 413);

    // alias must be the caller
    let jpeg = sample_jpeg();
    let resp = test::call_service(&app, post(&[("alias", None, b"artist".as_slice()), ("image", Some("a.jpg"), jpeg.as_slice())], &s.fan)).await;
    assert_eq!(resp.status(), 403);

    let resp = test::call_service(&app, post(&[("alias", None, b"artist".as_slice()), ("type", None, b"Collage".as_slice()), ("image", Some("a.jpg"), jpeg.as_slice())], &s.artist)).await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(&app, post(&[("image", Some("a.jpg"), jpeg.as_slice())], &s.artist)).await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(&app, post(&[("alias", None, b"artist".as_slice()), ("image", Some("a.jpg"), jpeg.as_slice())], &s.artist)).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["Format"], "jpg");
}

#[actix_web::test]
async fn authentication_is_required() {
    let s = setup(DEFAULT_MAX_UPLOAD_BYTES).await;
    let app = app!(s.state);
    let t = ts(Utc::now());

    let req = test::TestRequest::get().uri(&format!("/users/fan/stream?since={t}&latest={t}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers().get("WWW-Authenticate").unwrap(), "Bearer");

    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={t}&latest={t}"))
        .insert_header(("Authorization", format!("Bearer {}", uuid::Uuid::new_v4())))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={t}&latest={t}"))
        .insert_header(("Authorization", "Bearer not-a-uuid"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    // someone else's stream
    let req = test::TestRequest::get()
        .uri(&format!("/users/fan/stream?since={t}&latest={t}"))
        .insert_header(bearer(&s.artist))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // malformed cursor
    let req = test::TestRequest::get()
        .uri("/users/fan/stream?since=yesterday&latest=today")
        .insert_header(bearer(&s.fan))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn reactions_comments_and_titles() {
    let s = setup(DEFAULT_MAX_UPLOAD_BYTES).await;
    let app = app!(s.state);
    let jpeg = sample_jpeg();
    let (ct, body) = build_multipart(&[("alias", None, b"artist".as_slice()), ("image", Some("p.jpg"), jpeg.as_slice())], "ZZ");
    let req = test::TestRequest::post()
        .uri("/artworks")
        .insert_header(bearer(&s.artist))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let published: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = published["Id"].as_str().unwrap().to_string();

    // reaction: changed, then unchanged
    let put = |who: &User, alias: &str| {
        test::TestRequest::put()
            .uri(&format!("/artworks/{id}/reactions/{alias}"))
            .insert_header(bearer(who))
            .set_json(serde_json::json!({"Reaction": "Like"}))
            .to_request()
    };
    let first: Value = test::read_body_json(test::call_service(&app, put(&s.fan, "fan")).await).await;
    assert_eq!(first["Status"], "changed");
    assert!(first["Date"].is_string());
    let second: Value = test::read_body_json(test::call_service(&app, put(&s.fan, "fan")).await).await;
    assert_eq!(second["Status"], "unchanged");
    assert!(second.get("Date").is_none());
    assert_eq!(test::call_service(&app, put(&s.fan, "artist")).await.status(), 403);

    let req = test::TestRequest::get().uri(&format!("/artworks/{id}/reactions")).insert_header(bearer(&s.artist)).to_request();
    let reactions: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(reactions[0]["AuthorAlias"], "fan");
    assert_eq!(reactions[0]["Reaction"], "Like");

    let del = || {
        test::TestRequest::delete()
            .uri(&format!("/artworks/{id}/reactions/fan"))
            .insert_header(bearer(&s.fan))
            .to_request()
    };
    assert_eq!(test::call_service(&app, del()).await.status(), 204);
    assert_eq!(test::call_service(&app, del()).await.status(), 404);

    // comments
    let req = test::TestRequest::post()
        .uri(&format!("/artworks/{id}/comments"))
        .insert_header(bearer(&s.fan))
        .set_json(serde_json::json!({"Comment": "too short"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    let req = test::TestRequest::post()
        .uri(&format!("/artworks/{id}/comments"))
        .insert_header(bearer(&s.fan))
        .set_json(serde_json::json!({"Comment": "what a lovely light"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let comment_id = created["Id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri(&format!("/artworks/{id}/comments")).insert_header(bearer(&s.artist)).to_request();
    let comments: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(comments[0]["Comment"], "what a lovely light");
    assert_eq!(comments[0]["AuthorName"], "Fan");

    let req = test::TestRequest::delete()
        .uri(&format!("/artworks/{id}/comments/{comment_id}"))
        .insert_header(bearer(&s.artist))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::delete()
        .uri(&format!("/artworks/{id}/comments/{comment_id}"))
        .insert_header(bearer(&s.fan))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // titles
    let title = |who: &User| {
        test::TestRequest::put()
            .uri(&format!("/artworks/{id}/title"))
            .insert_header(bearer(who))
            .set_json(serde_json::json!({"Title": "Pier"}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, title(&s.fan)).await.status(), 404);
    assert_eq!(test::call_service(&app, title(&s.artist)).await.status(), 204);

    let req = test::TestRequest::patch()
        .uri(&format!("/artworks/{id}"))
        .insert_header(bearer(&s.artist))
        .set_json(serde_json::json!({"Year": 1999, "Location": "Lisbon"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let detail: Value = test::read_body_json(resp).await;
    assert_eq!(detail["Title"], "Pier");
    assert_eq!(detail["Year"], 1999);

    let req = test::TestRequest::patch()
        .uri(&format!("/artworks/{id}"))
        .insert_header(bearer(&s.artist))
        .set_json(serde_json::json!({}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // author listing
    let t = ts(Utc::now() + Duration::seconds(1));
    let req = test::TestRequest::get()
        .uri(&format!("/artworks?artist=artist&since={t}&latest={t}"))
        .insert_header(bearer(&s.fan))
        .to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["Total"], 1);
    assert_eq!(page["Artworks"][0]["Id"], id.as_str());
}
