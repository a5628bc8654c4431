//! Image acquisition tests: download path, cache behavior, and degraded
//! placeholder outcomes.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{ScriptedRunner, TestWorkspace};
use rockforge::core::acquire::{ImageAcquirer, ImageSource};
use rockforge::core::model::BuildConfiguration;
use rockforge::core::resolver::ArchiveResolver;
use rockforge::infra::runner::ToolError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xz2::write::XzEncoder;

const IMAGE_NAME: &str = "Armbian_24.5.0_Rock-5b_bookworm_legacy_minimal.img.xz";

fn config() -> BuildConfiguration {
    BuildConfiguration::from_toml(
        r#"
[board]
family = "rock5"
name = "rock-5b"
arch = "arm64"

[distribution]
release = "bookworm"
variant = "minimal"
"#,
    )
    .unwrap()
}

/// Runner whose external decompressors are "not installed", forcing the
/// in-process decoder.
fn no_tools_runner() -> Arc<ScriptedRunner> {
    Arc::new(
        ScriptedRunner::new()
            .respond_err(
                "xz",
                ToolError::Spawn {
                    tool: "xz".to_string(),
                    error: "not installed".to_string(),
                },
            )
            .respond_err(
                "unxz",
                ToolError::Spawn {
                    tool: "unxz".to_string(),
                    error: "not installed".to_string(),
                },
            ),
    )
}

fn xz_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

async fn archive_server(image_body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    let listing = format!(r#"<a href="{IMAGE_NAME}">img</a>"#);

    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/rock-5b/archive/{IMAGE_NAME}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_download_decompress_and_cache() {
    let workspace = TestWorkspace::new();
    let image_bytes = b"raw bootable image contents".to_vec();
    let server = archive_server(xz_bytes(&image_bytes)).await;

    let acquirer = ImageAcquirer::new(workspace.settings(), no_tools_runner())
        .with_resolver(ArchiveResolver::with_base_url(server.uri()));

    let acquired = acquirer.acquire(&config(), "job-1", &|_, _| {}).await.unwrap();

    assert_eq!(acquired.source, ImageSource::Download);
    assert_eq!(std::fs::read(&acquired.path).unwrap(), image_bytes);

    // The decompressed image landed in the cache under the canonical key.
    let cached = workspace.path().join("cache").join(config().cache_key());
    assert_eq!(std::fs::read(&cached).unwrap(), image_bytes);
}

#[tokio::test]
async fn test_cache_hit_is_byte_identical_to_download() {
    let workspace = TestWorkspace::new();
    let image_bytes = b"image produced by the real download path".to_vec();
    let server = archive_server(xz_bytes(&image_bytes)).await;

    let acquirer = ImageAcquirer::new(workspace.settings(), no_tools_runner())
        .with_resolver(ArchiveResolver::with_base_url(server.uri()));

    let first = acquirer.acquire(&config(), "job-1", &|_, _| {}).await.unwrap();
    assert_eq!(first.source, ImageSource::Download);

    // Second build for the same (board, release): cache hit, same bytes.
    let second = acquirer.acquire(&config(), "job-2", &|_, _| {}).await.unwrap();
    assert_eq!(second.source, ImageSource::Cache);
    assert_eq!(
        std::fs::read(&first.path).unwrap(),
        std::fs::read(&second.path).unwrap()
    );
}

#[tokio::test]
async fn test_zero_byte_download_degrades_to_placeholder() {
    let workspace = TestWorkspace::new();
    // The archive advertises the image but serves an empty body.
    let server = archive_server(Vec::new()).await;

    let acquirer = ImageAcquirer::new(workspace.settings(), no_tools_runner())
        .with_resolver(ArchiveResolver::with_base_url(server.uri()));

    let acquired = acquirer.acquire(&config(), "job-1", &|_, _| {}).await.unwrap();

    // The zero-byte file never survives: the step fails integrity and the
    // pipeline degrades.
    assert_eq!(acquired.source, ImageSource::Placeholder);
    let content = std::fs::read_to_string(&acquired.path).unwrap();
    assert!(content.contains("NOT BOOTABLE"));
}

#[tokio::test]
async fn test_offline_build_yields_small_self_describing_placeholder() {
    let workspace = TestWorkspace::new();

    let acquirer = ImageAcquirer::new(workspace.settings(), no_tools_runner())
        .with_resolver(ArchiveResolver::with_base_url("http://127.0.0.1:1"));

    let acquired = acquirer.acquire(&config(), "job-1", &|_, _| {}).await.unwrap();

    assert_eq!(acquired.source, ImageSource::Placeholder);
    let metadata = std::fs::metadata(&acquired.path).unwrap();
    assert!(metadata.len() > 0);
    assert!(metadata.len() < 4096);

    let content = std::fs::read_to_string(&acquired.path).unwrap();
    assert!(content.contains("NOT BOOTABLE"));
    assert!(content.contains("rock-5b"));
    assert!(content.contains("bookworm"));
}

#[tokio::test]
async fn test_progress_reports_reach_completion() {
    let workspace = TestWorkspace::new();
    let image_bytes = vec![7u8; 64 * 1024];
    let server = archive_server(xz_bytes(&image_bytes)).await;

    let acquirer = ImageAcquirer::new(workspace.settings(), no_tools_runner())
        .with_resolver(ArchiveResolver::with_base_url(server.uri()));

    let reports = std::sync::Mutex::new(Vec::new());
    let progress = |pct: u8, msg: &str| {
        reports.lock().unwrap().push((pct, msg.to_string()));
    };

    acquirer.acquire(&config(), "job-1", &progress).await.unwrap();

    let reports = reports.into_inner().unwrap();
    assert!(!reports.is_empty());
    assert_eq!(reports.last().unwrap().0, 100);
}
