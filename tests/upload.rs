#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use atelier::models::*;
use atelier::repo::inmem::InMemRepo;
use atelier::repo::{ArtworkRepo, FeedbackRepo, RepoError};
use atelier::storage::{BlobError, BlobStore};
use atelier::upload::{content_id, Upload, UploadError, UploadPipeline, DEFAULT_MAX_UPLOAD_BYTES};
use uuid::Uuid;

// ---------------- Counting mock BlobStore (tests only) ----------------
#[derive(Default)]
struct MockBlobStore {
    inner: Mutex<HashMap<String, Vec<u8>>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

#[async_trait::async_trait]
impl BlobStore for MockBlobStore {
    async fn save(&self, id: &str, format: ImageFormat, bytes: &[u8]) -> Result<(), BlobError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BlobError::Other("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().insert(format!("{id}.{format}"), bytes.to_vec());
        Ok(())
    }
    async fn load(&self, id: &str, format: ImageFormat) -> Result<Vec<u8>, BlobError> {
        self.inner.lock().unwrap().get(&format!("{id}.{format}")).cloned().ok_or(BlobError::NotFound)
    }
    async fn exists(&self, id: &str, format: ImageFormat) -> Result<bool, BlobError> {
        Ok(self.inner.lock().unwrap().contains_key(&format!("{id}.{format}")))
    }
    async fn delete(&self, id: &str, format: ImageFormat) -> Result<(), BlobError> {
        self.inner.lock().unwrap().remove(&format!("{id}.{format}")).map(|_| ()).ok_or(BlobError::NotFound)
    }
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

struct Harness {
    repo: Arc<InMemRepo>,
    blobs: Arc<MockBlobStore>,
    pipeline: UploadPipeline,
}

fn harness(max_bytes: usize) -> Harness {
    let repo = Arc::new(InMemRepo::new());
    let blobs = Arc::new(MockBlobStore::default());
    let pipeline = UploadPipeline::new(repo.clone(), blobs.clone(), max_bytes);
    Harness { repo, blobs, pipeline }
}

fn upload(author: UserId, bytes: Vec<u8>) -> Upload {
    Upload { author, kind: ArtworkType::Drawing, title: Some("Study".into()), bytes }
}

#[tokio::test]
async fn duplicate_live_upload_conflicts_without_second_blob() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let author = Uuid::new_v4();

    let first = h.pipeline.publish(upload(author, sample_png())).await.unwrap();
    assert_eq!(first.id, content_id(&sample_png()));
    assert_eq!(first.format, ImageFormat::Png);
    assert!(!first.resurrected);

    let err = h.pipeline.publish(upload(author, sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::Duplicate));
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 1);

    // identity is not namespaced per author
    let err = h.pipeline.publish(upload(Uuid::new_v4(), sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::Duplicate));
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reupload_after_delete_resurrects_same_row() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let author = Uuid::new_v4();
    let first = h.pipeline.publish(upload(author, sample_png())).await.unwrap();

    h.repo
        .set_reaction(&first.id, Uuid::new_v4(), ReactionKind::Like, now())
        .await
        .unwrap();
    h.repo.soft_delete_artwork(&first.id, author, now()).await.unwrap();

    let again = h.pipeline.publish(upload(author, sample_png())).await.unwrap();
    assert_eq!(again.id, first.id);
    assert!(again.resurrected);
    assert!(again.updated >= first.updated);
    // blob was still on disk
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 1);

    let row = h.repo.find_artwork(&first.id).await.unwrap();
    assert!(!row.deleted);
    assert_eq!(row.added, again.updated);
    assert_eq!(h.repo.count_live(author).await.unwrap(), 1);
    // feedback from the previous life is gone
    assert_eq!(h.repo.feedback_counts(&first.id).await.unwrap(), (0, 0));
}

#[tokio::test]
async fn resurrection_rewrites_a_missing_blob() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let author = Uuid::new_v4();
    let first = h.pipeline.publish(upload(author, sample_png())).await.unwrap();
    h.repo.soft_delete_artwork(&first.id, author, now()).await.unwrap();
    h.blobs.delete(&first.id, ImageFormat::Png).await.unwrap();

    h.pipeline.publish(upload(author, sample_png())).await.unwrap();
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 2);
    assert_eq!(h.blobs.load(&first.id, ImageFormat::Png).await.unwrap(), sample_png());
}

#[tokio::test]
async fn another_authors_tombstone_is_a_duplicate() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let owner = Uuid::new_v4();
    let first = h.pipeline.publish(upload(owner, sample_png())).await.unwrap();
    h.repo.soft_delete_artwork(&first.id, owner, now()).await.unwrap();

    let err = h.pipeline.publish(upload(Uuid::new_v4(), sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::Duplicate));
    assert!(h.repo.find_artwork(&first.id).await.unwrap().deleted);
}

#[tokio::test]
async fn rejects_unsupported_content_before_storing() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let gif = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!".to_vec();
    let err = h.pipeline.publish(upload(Uuid::new_v4(), gif.clone())).await.unwrap_err();
    match err {
        UploadError::UnsupportedFormat { detected } => assert_eq!(detected.as_deref(), Some("image/gif")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(h.repo.find_artwork(&content_id(&gif)).await, Err(RepoError::NotFound)));

    // a .png name means nothing; only the bytes count
    let err = h.pipeline.publish(upload(Uuid::new_v4(), b"definitely not an image".to_vec())).await.unwrap_err();
    assert!(matches!(err, UploadError::UnsupportedFormat { detected: None }));
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejects_oversize_payload() {
    let h = harness(16);
    let err = h.pipeline.publish(upload(Uuid::new_v4(), sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::TooLarge { limit: 16 }));
    assert_eq!(h.blobs.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blob_failure_rolls_back_catalog_row() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    h.blobs.fail_saves.store(true, Ordering::SeqCst);

    let err = h.pipeline.publish(upload(Uuid::new_v4(), sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::Storage(_)));
    assert!(matches!(h.repo.find_artwork(&content_id(&sample_png())).await, Err(RepoError::NotFound)));

    // the identity is free again once storage recovers
    h.blobs.fail_saves.store(false, Ordering::SeqCst);
    h.pipeline.publish(upload(Uuid::new_v4(), sample_png())).await.unwrap();
}

#[tokio::test]
async fn blob_failure_on_resurrection_restores_tombstone() {
    let h = harness(DEFAULT_MAX_UPLOAD_BYTES);
    let author = Uuid::new_v4();
    let first = h.pipeline.publish(upload(author, sample_png())).await.unwrap();
    h.repo.soft_delete_artwork(&first.id, author, now()).await.unwrap();
    h.blobs.delete(&first.id, ImageFormat::Png).await.unwrap();
    h.blobs.fail_saves.store(true, Ordering::SeqCst);

    let err = h.pipeline.publish(upload(author, sample_png())).await.unwrap_err();
    assert!(matches!(err, UploadError::Storage(_)));
    assert!(h.repo.find_artwork(&first.id).await.unwrap().deleted);
}
