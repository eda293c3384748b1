use crate::library::{BackendCsv, ImageCreate, ImageManager, ImageUpdate, ProcessingStatus};
use crate::vectors::VectorSpace;

fn create_backend() -> (BackendCsv, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let path = tmp.path().join("library.csv");
    let space = VectorSpace::default();

    let backend = BackendCsv::load(
        path.to_str().unwrap(),
        space.tag_dim(),
        space.color_dim(),
    )
    .expect("failed to create library csv");

    (backend, tmp)
}

fn sample_create(user: &str, filename: &str) -> ImageCreate {
    ImageCreate {
        user_id: user.to_string(),
        filename: filename.to_string(),
        original_path: format!("{user}/{filename}"),
        thumbnail_path: None,
    }
}

#[test]
fn test_create_and_get() {
    let (backend, _tmp) = create_backend();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();
    assert_eq!(record.status, ProcessingStatus::Pending);
    assert!(record.tag_vec.is_none());

    let fetched = backend.get(&record.id).unwrap().expect("record missing");
    assert_eq!(fetched.filename, "cat.png");

    assert!(backend.get("no-such-id").unwrap().is_none());
}

#[test]
fn test_update_sets_enrichment_fields() {
    let (backend, _tmp) = create_backend();
    let space = VectorSpace::default();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();

    let updated = backend
        .update(
            &record.id,
            ImageUpdate {
                description: Some("a cat".to_string()),
                tags: Some(vec!["cat".to_string(), "cat".to_string(), "pet".to_string()]),
                colors: Some(vec!["#ff0000".to_string()]),
                tag_vec: Some(space.tag_vector(["cat", "pet"])),
                color_vec: Some(space.color_vector(["#ff0000"])),
                status: Some(ProcessingStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap()
        .expect("record missing");

    // duplicate tags collapse
    assert_eq!(updated.tags, vec!["cat", "pet"]);
    assert_eq!(updated.status, ProcessingStatus::Completed);
    assert!(updated.tag_vec.is_some());
}

#[test]
fn test_clear_vectors() {
    let (backend, _tmp) = create_backend();
    let space = VectorSpace::default();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();
    backend
        .update(
            &record.id,
            ImageUpdate {
                tag_vec: Some(space.tag_vector(["cat"])),
                color_vec: Some(space.color_vector(["#ff0000"])),
                status: Some(ProcessingStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();

    let reset = backend
        .update(
            &record.id,
            ImageUpdate {
                status: Some(ProcessingStatus::Pending),
                clear_vectors: true,
                ..Default::default()
            },
        )
        .unwrap()
        .expect("record missing");

    assert!(reset.tag_vec.is_none());
    assert!(reset.color_vec.is_none());
    assert_eq!(reset.status, ProcessingStatus::Pending);
}

#[test]
fn test_roundtrip_preserves_vectors() {
    let (backend, tmp) = create_backend();
    let space = VectorSpace::default();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();
    let tag_vec = space.tag_vector(["cat", "sunset", "beach"]);
    let color_vec = space.color_vector(["#ff0000", "#00ffff"]);

    backend
        .update(
            &record.id,
            ImageUpdate {
                description: Some("desc".to_string()),
                tags: Some(vec!["cat".to_string()]),
                tag_vec: Some(tag_vec.clone()),
                color_vec: Some(color_vec.clone()),
                status: Some(ProcessingStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();

    // load a fresh backend from the same file
    let path = tmp.path().join("library.csv");
    let reloaded = BackendCsv::load(
        path.to_str().unwrap(),
        space.tag_dim(),
        space.color_dim(),
    )
    .unwrap();

    let record = reloaded.get(&record.id).unwrap().expect("record missing");
    assert_eq!(record.tag_vec.as_deref(), Some(tag_vec.as_slice()));
    assert_eq!(record.color_vec.as_deref(), Some(color_vec.as_slice()));
    assert_eq!(record.description.as_deref(), Some("desc"));
    assert_eq!(record.status, ProcessingStatus::Completed);
}

#[test]
fn test_wrong_dimension_vector_ignored_on_load() {
    let (backend, tmp) = create_backend();
    let space = VectorSpace::default();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();

    // hand-write a row with a short tag_vec cell
    let path = tmp.path().join("library.csv");
    let content = std::fs::read_to_string(&path).unwrap();
    let patched = content.replace(",,,pending", ",\"[1.0,2.0]\",\"[0.5]\",pending");
    assert_ne!(content, patched, "fixture row did not match");
    std::fs::write(&path, patched).unwrap();

    let reloaded = BackendCsv::load(
        path.to_str().unwrap(),
        space.tag_dim(),
        space.color_dim(),
    )
    .unwrap();

    let record = reloaded.get(&record.id).unwrap().expect("record missing");
    assert!(record.tag_vec.is_none());
    assert!(record.color_vec.is_none());
}

#[test]
fn test_delete() {
    let (backend, _tmp) = create_backend();

    let record = backend.create(sample_create("user-1", "cat.png")).unwrap();
    assert!(backend.delete(&record.id).unwrap());
    assert!(!backend.delete(&record.id).unwrap());
    assert!(backend.get(&record.id).unwrap().is_none());
}

#[test]
fn test_list_scoped_by_user() {
    let (backend, _tmp) = create_backend();

    backend.create(sample_create("user-1", "a.png")).unwrap();
    backend.create(sample_create("user-1", "b.png")).unwrap();
    backend.create(sample_create("user-2", "c.png")).unwrap();

    assert_eq!(backend.list("user-1").unwrap().len(), 2);
    assert_eq!(backend.list("user-2").unwrap().len(), 1);
    assert_eq!(backend.list("user-3").unwrap().len(), 0);
    assert_eq!(backend.all().unwrap().len(), 3);
    assert_eq!(backend.total().unwrap(), 3);
}
