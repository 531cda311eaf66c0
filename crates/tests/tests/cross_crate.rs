//! Cross-crate integration and E2E tests
//!
//! These tests verify that the crates work together: documented defaults
//! drive explorer settings, and the HTTP embedder talks to a real socket.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use serde_json::{Value, json};
use sightline_docs::TableBuilder;
use sightline_explorer::{
    DEFAULT_SPLIT, Embedder, Explorer, ExplorerError, HttpEmbedder, HttpEmbedderConfig,
    ImageInput,
};

const DEFAULTS_YAML: &str = "\
# Explorer defaults ----------------------------------------------------------------------------------------------------

# Val/Test settings ----------------------------------------------------------------------------------------------------
val: True  # (bool) validate/test during training
split: val  # (str) dataset split to use for validation, i.e. 'val', 'test' or 'train'
conf:  # (float, optional) object confidence threshold for detection
";

/// Writes a two-split dataset under `root` and returns the descriptor path.
fn write_dataset(root: &Path) -> PathBuf {
    for (split, names) in [("train", &["a.jpg", "b.jpg"][..]), ("val", &["c.jpg", "dd.jpg"][..])] {
        let images = root.join("images").join(split);
        let labels = root.join("labels").join(split);
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        for (i, name) in names.iter().enumerate() {
            fs::write(images.join(name), b"").unwrap();
            let stem = Path::new(name).file_stem().unwrap().to_str().unwrap();
            fs::write(
                labels.join(format!("{stem}.txt")),
                format!("{i} 0.5 0.5 0.5 0.5\n"),
            )
            .unwrap();
        }
    }

    let yaml = root.join("pair.yaml");
    fs::write(
        &yaml,
        "train: images/train\nval: images/val\nnames:\n  0: cat\n  1: dog\n",
    )
    .unwrap();
    yaml
}

/// Embedder that maps an image to `[file name length, 1.0]`.
struct NameLengthEmbedder;

impl Embedder for NameLengthEmbedder {
    fn name(&self) -> &str {
        "name-length"
    }

    fn embed(&self, images: &[PathBuf]) -> sightline_explorer::Result<Vec<Vec<f32>>> {
        Ok(images
            .iter()
            .map(|p| {
                let len = p.file_name().map_or(0, |n| n.len());
                vec![len as f32, 1.0]
            })
            .collect())
    }
}

type RequestLog = Arc<Mutex<Vec<Value>>>;

/// Handle POST /embed with [`NameLengthEmbedder`] vectors.
async fn handle_embed(
    State(log): State<RequestLog>,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    let images: Vec<PathBuf> = request["images"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
        .unwrap_or_default();
    log.lock().unwrap().push(request);

    match NameLengthEmbedder.embed(&images) {
        Ok(embeddings) => (StatusCode::OK, Json(json!({ "embeddings": embeddings }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Serve `/embed` on a local port from a background runtime, recording
/// every request body.
///
/// The blocking embedder cannot run inside a runtime, so the server gets a
/// thread of its own.
fn spawn_embed_service() -> (String, RequestLog) {
    let requests = RequestLog::default();
    let app = Router::new()
        .route("/embed", post(handle_embed))
        .with_state(Arc::clone(&requests));

    let (addr_tx, addr_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind embed service");
            addr_tx
                .send(listener.local_addr().expect("Failed to get local address"))
                .ok();
            axum::serve(listener, app).await.ok();
        });
    });

    let addr = addr_rx.recv().expect("embed service did not start");
    (format!("http://{}", addr), requests)
}

/// The documented `split` default selects which split the explorer embeds.
#[test]
fn test_documented_split_drives_explorer() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write_dataset(dir.path());

    let tables = TableBuilder::new().build(DEFAULTS_YAML).unwrap();
    assert_eq!(tables.len(), 1);
    let split = tables[0].get("split").expect("split documented");
    assert_eq!(split.type_name, "str");
    let split = split.value.as_str().unwrap().to_string();
    assert_eq!(split, "val");

    let mut exp = Explorer::new(Some(yaml), Arc::new(NameLengthEmbedder), ":memory:").unwrap();
    exp.create_embeddings_table(false, &split).unwrap();

    assert_eq!(exp.table_len().unwrap(), 2);
    let dogs = exp.sql_query("labels LIKE '%dog%'").unwrap();
    assert_eq!(dogs.len(), 1);
    assert!(dogs.im_files()[0].ends_with("dd.jpg"));
}

/// Custom embedders plug into the explorer through the trait.
#[test]
fn test_custom_embedder_query() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write_dataset(dir.path());

    let query_image = dir.path().join("xy.jpg");
    fs::write(&query_image, b"").unwrap();

    let mut exp = Explorer::new(Some(yaml), Arc::new(NameLengthEmbedder), ":memory:").unwrap();
    exp.create_embeddings_table(false, DEFAULT_SPLIT).unwrap();

    // xy.jpg embeds as [6, 1]; both train images embed as [5, 1].
    let result = exp.query(ImageInput::path(&query_image), 2).unwrap();
    assert_eq!(result.distances(), vec![Some(1.0), Some(1.0)]);

    let err = exp
        .get_similar(Some(ImageInput::path(&query_image)), Some(vec![0]), 2)
        .unwrap_err();
    assert!(matches!(err, ExplorerError::Config(_)));
}

/// Full flow through the HTTP embedder: build, query, and index.
#[test]
fn test_http_embedder_end_to_end() {
    let (base_url, requests) = spawn_embed_service();
    let dir = tempfile::tempdir().unwrap();
    let yaml = write_dataset(dir.path());

    let embedder = HttpEmbedder::new(
        HttpEmbedderConfig::new()
            .with_base_url(base_url)
            .with_model("yolov8s.pt"),
    )
    .unwrap();
    let mut exp = Explorer::new(Some(yaml), Arc::new(embedder), ":memory:").unwrap();
    exp.create_embeddings_table(false, "val").unwrap();

    // One request to size the table, then one per image.
    {
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r["model"] == "yolov8s.pt"));
    }

    let result = exp.get_similar(None, Some(vec![1]), 1).unwrap();
    assert!(result.im_files()[0].ends_with("dd.jpg"));
    assert_eq!(result.distances(), vec![Some(0.0)]);

    // A missing image fails before any request reaches the service.
    let sent = requests.lock().unwrap().len();
    let missing = dir.path().join("images/val/gone.jpg");
    let err = exp.query(ImageInput::path(&missing), 1).unwrap_err();
    assert!(matches!(err, ExplorerError::ImageNotFound(p) if p == missing));
    assert_eq!(requests.lock().unwrap().len(), sent);

    let index = exp.similarity_index(0.5, None, false).unwrap();
    assert_eq!(index.counts(), vec![1, 1]);

    let json = serde_json::to_value(exp.sql_query("idx = 0").unwrap()).unwrap();
    assert_eq!(json[0]["vector"], json!([5.0, 1.0]));
}

/// An unreachable service surfaces as an embedding error.
#[test]
fn test_http_embedder_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let embedder = HttpEmbedder::new(
        HttpEmbedderConfig::new().with_base_url(format!("http://127.0.0.1:{}", port)),
    )
    .unwrap();

    let err = embedder.embed(&[PathBuf::from("a.jpg")]).unwrap_err();
    assert!(matches!(err, ExplorerError::Embedding(_)));
}
