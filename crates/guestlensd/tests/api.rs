//! HTTP-level tests for guestlensd, driven through the router with a
//! colour-based stand-in for the ONNX models.

use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, SystemTime};

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use guestlens_core::{BoundingBox, Embedding, FacePipeline, PipelineError};
use guestlensd::{config::Config, router, AppState};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "guestlens-test-boundary";

/// One "face" covering the whole image, encoded as its mean colour.
/// Images darker than a threshold have no face.
struct ColourPipeline;

fn mean_colour(image: &RgbImage) -> [f32; 3] {
    let mut sum = [0.0f64; 3];
    for pixel in image.pixels() {
        for (acc, v) in sum.iter_mut().zip(pixel.0) {
            *acc += f64::from(v);
        }
    }
    let n = f64::from(image.width() * image.height()).max(1.0);
    [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
}

impl FacePipeline for ColourPipeline {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        let [r, g, b] = mean_colour(image);
        if r + g + b < 60.0 {
            return Ok(Vec::new());
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: Some([
                (w * 0.3, h * 0.4),
                (w * 0.7, h * 0.4),
                (w * 0.5, h * 0.55),
                (w * 0.35, h * 0.75),
                (w * 0.65, h * 0.75),
            ]),
        }])
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, PipelineError> {
        let colour = mean_colour(image);
        Ok(faces
            .iter()
            .map(|_| Embedding {
                values: colour.to_vec(),
                model_version: Some("colour-v1".to_string()),
            })
            .collect())
    }

    fn model_version(&self) -> &str {
        "colour-v1"
    }
}

fn png(colour: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(24, 24, Rgb(colour));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).expect("encode png");
    bytes.into_inner()
}

const RED: [u8; 3] = [200, 30, 30];
const NEAR_RED: [u8; 3] = [190, 40, 35];
const GREEN: [u8; 3] = [30, 200, 30];
const DARK: [u8; 3] = [5, 5, 5];

struct TestApp {
    _dir: TempDir,
    app: Router,
    config: Config,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_, _| {})
    }

    /// Build the app after `configure` adjusts the default test config.
    fn with_config(configure: impl FnOnce(&Path, &mut Config)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = Config {
            data_dir: dir.path().join("uploads"),
            cache_path: dir.path().join("cache.json"),
            ..Config::default()
        };
        configure(dir.path(), &mut config);
        let state = AppState::new(&config, ColourPipeline).expect("app state");
        let app = router(state, config.max_upload_bytes);
        Self { _dir: dir, app, config }
    }

    async fn match_count(&self, selfie: [u8; 3]) -> u64 {
        let (status, body) = self
            .post_files("/find_matches", "guest_photo", &[("me.png", png(selfie))])
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["total_matches"].as_u64().expect("total_matches")
    }

    async fn cached_images(&self) -> u64 {
        let (_, body) = self.get("/get_cache_stats").await;
        body["cache_stats"]["cached_images"].as_u64().expect("cached_images")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("request failed");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().method(Method::POST).uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_files(&self, uri: &str, field: &str, files: &[(&str, Vec<u8>)]) -> (StatusCode, Value) {
        self.send(multipart_request(uri, field, files)).await
    }

    async fn upload(&self, files: &[(&str, Vec<u8>)]) -> Vec<String> {
        let (status, body) = self.post_files("/upload_wedding_photos", "photos", files).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["uploaded"]
            .as_array()
            .expect("uploaded list")
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }
}

fn multipart_request(uri: &str, field: &str, files: &[(&str, Vec<u8>)]) -> Request<Body> {
    let mut body = Vec::new();
    for (filename, bytes) in files {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_pages_and_script_are_served() {
    let app = TestApp::new();
    app.upload(&[("one.png", png(RED))]).await;

    for uri in ["/", "/guest", "/static/js/main.js"] {
        let response = app
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }

    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/photographer").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(html.to_vec()).unwrap();
    assert!(html.contains("<span id=\"photo-count\">1</span>"));
    assert!(!html.contains("{{ photo_count }}"));
}

#[tokio::test]
async fn test_upload_and_list_photos() {
    let app = TestApp::new();
    let uploaded = app
        .upload(&[("Party Pic.png", png(RED)), ("notes.txt", b"hello".to_vec())])
        .await;
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].starts_with("Party_Pic_") && uploaded[0].ends_with(".png"));

    let (status, body) = app.get("/get_wedding_photos").await;
    assert_eq!(status, StatusCode::OK);
    let photos = body.as_array().unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0]["filename"], uploaded[0].as_str());
    assert_eq!(
        photos[0]["path"],
        format!("/static/uploads/wedding_photos/{}", uploaded[0]).as_str()
    );

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(photos[0]["path"].as_str().unwrap())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_reports_rejected_files() {
    let app = TestApp::new();
    let (status, body) = app
        .post_files("/upload_wedding_photos", "photos", &[("fake.jpg", b"not an image".to_vec())])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Successfully uploaded 0 photos");
    assert_eq!(body["rejected"][0]["filename"], "fake.jpg");
}

#[tokio::test]
async fn test_upload_without_photos_field() {
    let app = TestApp::new();
    let (status, body) = app
        .post_files("/upload_wedding_photos", "other", &[("a.png", png(RED))])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No photos provided");
}

#[tokio::test]
async fn test_find_matches_returns_matching_photos() {
    let app = TestApp::new();
    let uploaded = app
        .upload(&[("red.png", png(RED)), ("green.png", png(GREEN)), ("dark.png", png(DARK))])
        .await;
    let red = uploaded.iter().find(|n| n.starts_with("red_")).unwrap().clone();

    let (status, body) = app
        .post_files("/find_matches", "guest_photo", &[("me.png", png(NEAR_RED))])
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["total_matches"], 1);
    assert_eq!(body["matches"][0]["filename"], red.as_str());

    let confidence = body["matches"][0]["confidence"].as_f64().unwrap();
    let distance = body["matches"][0]["face_distance"].as_f64().unwrap();
    assert!(confidence > 0.9, "{confidence}");
    assert!((confidence + distance - 1.0).abs() < 1e-4);

    let stats = &body["stats"];
    assert_eq!(stats["total_photos_processed"], 3);
    assert_eq!(stats["total_faces_found"], 2);
    assert_eq!(stats["errors"], 0);
    assert!((stats["tolerance_used"].as_f64().unwrap() - 0.6).abs() < 1e-6);

    // The selfie is only kept for the duration of the request.
    assert_eq!(dir_entries(&app.config.guest_dir()), 0);
    assert!(app.config.cache_path.exists());
}

#[tokio::test]
async fn test_find_matches_without_match() {
    let app = TestApp::new();
    app.upload(&[("green.png", png(GREEN))]).await;

    let (status, body) = app
        .post_files("/find_matches", "guest_photo", &[("me.png", png(RED))])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_matches"], 0);
    assert!(body["matches"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_find_matches_rejects_bad_selfies() {
    let app = TestApp::new();
    app.upload(&[("red.png", png(RED))]).await;

    let (status, body) = app
        .post_files("/find_matches", "guest_photo", &[("me.png", png(DARK))])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("No face detected"));

    let (status, body) = app
        .post_files("/find_matches", "guest_photo", &[("me.txt", b"hello".to_vec())])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid file format");

    let (status, body) = app.post_files("/find_matches", "photos", &[("me.png", png(RED))]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No guest photo provided");

    assert_eq!(dir_entries(&app.config.guest_dir()), 0);
}

#[tokio::test]
async fn test_preprocess_and_cache_lifecycle() {
    let app = TestApp::new();
    app.upload(&[("red.png", png(RED)), ("green.png", png(GREEN)), ("dark.png", png(DARK))])
        .await;

    let (status, body) = app.post_empty("/preprocess_photos").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["stats"]["total_files"], 3);
    assert_eq!(body["stats"]["processed"], 3);
    assert_eq!(body["stats"]["total_faces_found"], 2);
    assert_eq!(body["stats"]["cache_size"], 3);

    let (_, body) = app.get("/get_cache_stats").await;
    assert_eq!(body["cache_stats"]["cached_images"], 3);
    assert_eq!(body["cache_stats"]["total_encodings"], 2);
    assert_eq!(body["cache_stats"]["cache_file_exists"], true);

    let (status, body) = app.post_empty("/clear_cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Face recognition cache cleared successfully");
    assert!(!app.config.cache_path.exists());

    let (_, body) = app.get("/get_cache_stats").await;
    assert_eq!(body["cache_stats"]["cached_images"], 0);
    assert_eq!(body["cache_stats"]["cache_file_exists"], false);
}

#[tokio::test]
async fn test_face_debug() {
    let app = TestApp::new();
    let uploaded = app.upload(&[("red.png", png(RED))]).await;

    let (status, body) = app.get(&format!("/face_debug/{}", uploaded[0])).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["faces_detected"], 1);
    assert_eq!(body["encodings_count"], 1);
    assert_eq!(body["faces_info"][0]["width"], 24);
    assert_eq!(body["faces_info"][0]["location"]["top"], 0);

    let (status, body) = app.get("/face_debug/missing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Image not found");
}

#[tokio::test]
async fn test_delete_photo_drops_cache_entry() {
    let app = TestApp::new();
    let uploaded = app.upload(&[("red.png", png(RED))]).await;
    app.post_empty("/preprocess_photos").await;

    let uri = format!("/wedding_photos/{}", uploaded[0]);
    let delete = || Request::builder().method(Method::DELETE).uri(uri.as_str()).body(Body::empty()).unwrap();

    let (status, _) = app.send(delete()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get("/get_wedding_photos").await;
    assert!(body.as_array().unwrap().is_empty());
    let (_, body) = app.get("/get_cache_stats").await;
    assert_eq!(body["cache_stats"]["cached_images"], 0);

    let (status, _) = app.send(delete()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: dir.path().join("uploads"),
        cache_path: dir.path().join("cache.json"),
        ..Config::default()
    };

    {
        let state = AppState::new(&config, ColourPipeline).unwrap();
        let app = router(state, config.max_upload_bytes);
        let response = app
            .clone()
            .oneshot(multipart_request("/upload_wedding_photos", "photos", &[("red.png", png(RED))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/preprocess_photos")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let state = AppState::new(&config, ColourPipeline).unwrap();
    let stats = state.matcher.cache_stats();
    assert_eq!(stats.cached_images, 1);
    assert_eq!(stats.total_encodings, 1);
}

#[tokio::test]
async fn test_photos_copied_in_by_hand_are_matched() {
    let app = TestApp::new();
    for name in ["IMG 001.png", "_DSC0002.png"] {
        std::fs::write(app.config.photos_dir().join(name), png(RED)).unwrap();
    }

    let (status, body) = app
        .post_files("/find_matches", "guest_photo", &[("me.png", png(NEAR_RED))])
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total_matches"], 2);
    assert_eq!(body["stats"]["errors"], 0);
    assert!(body["matches"][0]["path"]
        .as_str()
        .unwrap()
        .starts_with("/static/uploads/wedding_photos/"));

    let (status, body) = app.get("/face_debug/IMG%20001.png").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["faces_detected"], 1);

    let (status, body) = app.get("/face_debug/sub/missing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Image not found");

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/wedding_photos/_DSC0002.png")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dir_entries(&app.config.photos_dir()), 1);
}

#[tokio::test]
async fn test_unwritable_cache_does_not_fail_requests() {
    let app = TestApp::with_config(|dir, config| {
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, b"plain file").unwrap();
        config.cache_path = blocker.join("cache.json");
    });
    let uploaded = app.upload(&[("red.png", png(RED)), ("green.png", png(GREEN))]).await;

    assert_eq!(app.match_count(NEAR_RED).await, 1);

    let (status, body) = app.post_empty("/preprocess_photos").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["stats"]["processed"], 2);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/wedding_photos/{}", uploaded[0]))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Encodings stay available in memory even though nothing reached disk.
    assert_eq!(app.cached_images().await, 1);
    assert!(!app.config.cache_path.exists());
}

#[tokio::test]
async fn test_upload_over_body_limit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: dir.path().join("uploads"),
        cache_path: dir.path().join("cache.json"),
        ..Config::default()
    };
    let state = AppState::new(&config, ColourPipeline).unwrap();
    let app = router(state, 1024);

    let mut large = png(RED);
    large.resize(4096, 0);
    let response = app
        .clone()
        .oneshot(multipart_request("/upload_wedding_photos", "photos", &[("big.png", large)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(dir_entries(&config.photos_dir()), 0);

    let response = app
        .oneshot(multipart_request("/upload_wedding_photos", "photos", &[("small.png", png(RED))]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_match_scan_prunes_entries_for_missing_photos() {
    let app = TestApp::new();
    let uploaded = app.upload(&[("red.png", png(RED)), ("green.png", png(GREEN))]).await;
    app.post_empty("/preprocess_photos").await;
    assert_eq!(app.cached_images().await, 2);

    let green = uploaded.iter().find(|n| n.starts_with("green_")).unwrap();
    std::fs::remove_file(app.config.photos_dir().join(green)).unwrap();

    assert_eq!(app.match_count(NEAR_RED).await, 1);
    assert_eq!(app.cached_images().await, 1);

    let saved: Value = serde_json::from_slice(&std::fs::read(&app.config.cache_path).unwrap()).unwrap();
    assert!(saved["entries"].get(green.as_str()).is_none());
}

#[tokio::test]
async fn test_replaced_photo_is_reencoded() {
    let app = TestApp::new();
    let uploaded = app.upload(&[("portrait.png", png(RED))]).await;
    assert_eq!(app.match_count(NEAR_RED).await, 1);
    assert_eq!(app.match_count(GREEN).await, 0);

    // The PNG may keep its byte length, so push the mtime forward too.
    let path = app.config.photos_dir().join(&uploaded[0]);
    std::fs::write(&path, png(GREEN)).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    drop(file);

    assert_eq!(app.match_count(NEAR_RED).await, 0);
    assert_eq!(app.match_count(GREEN).await, 1);
    assert_eq!(app.cached_images().await, 1);
}
