//! Archive resolver tests against a mock archive server

use rockforge::core::model::ImageVariant;
use rockforge::core::resolver::ArchiveResolver;
use rockforge::error::ResolveError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"
<html><body>
<a href="Armbian_24.2.1_Rock-5b_bookworm_legacy_minimal.img.xz">a</a>
<a href="Armbian_24.5.0_Rock-5b_bookworm_legacy_minimal.img.xz">b</a>
<a href="Armbian_24.5.0_Rock-5b_bookworm_legacy_minimal.img.xz.sha">c</a>
<a href="Armbian_24.5.0_Rock-5b_bookworm_legacy_gnome.img.xz">d</a>
<a href="Armbian_24.5.0_Rock-5b_jammy_legacy_minimal.img.xz">e</a>
</body></html>
"#;

#[tokio::test]
async fn test_resolves_newest_minimal_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let url = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Minimal, None)
        .await
        .unwrap();

    // Lexicographically newest of the matching candidates.
    assert!(url.ends_with("Armbian_24.5.0_Rock-5b_bookworm_legacy_minimal.img.xz"));
}

#[tokio::test]
async fn test_resolves_desktop_environment_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let url = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Desktop, Some("gnome"))
        .await
        .unwrap();

    assert!(url.ends_with("Armbian_24.5.0_Rock-5b_bookworm_legacy_gnome.img.xz"));
}

#[tokio::test]
async fn test_follows_redirect_chain() {
    let server = MockServer::start().await;

    // rock-5b listing bounces twice before landing.
    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/mirror1/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirror1/"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/mirror2/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirror2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let url = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Minimal, None)
        .await
        .unwrap();

    assert!(url.contains("minimal.img.xz"));
}

#[tokio::test]
async fn test_probes_board_name_variants() {
    let server = MockServer::start().await;

    // Only the punctuation-stripped spelling exists on this archive.
    Mock::given(method("GET"))
        .and(path("/rock5b/archive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let url = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Minimal, None)
        .await
        .unwrap();

    assert!(url.contains("/rock5b/archive/"));
}

#[tokio::test]
async fn test_image_not_found_after_exhausting_variants() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let result = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Minimal, None)
        .await;

    assert!(matches!(result, Err(ResolveError::ImageNotFound { .. })));
}

#[tokio::test]
async fn test_release_mismatch_is_image_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    let result = resolver
        .resolve("rock-5b", "trixie", ImageVariant::Minimal, None)
        .await;

    assert!(matches!(result, Err(ResolveError::ImageNotFound { .. })));
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rock-5b/archive/"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/rock-5b/archive/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = ArchiveResolver::with_base_url(server.uri());
    // The looping variant is skipped; with no other variant matching, the
    // archive is reported as not having the image.
    let result = resolver
        .resolve("rock-5b", "bookworm", ImageVariant::Minimal, None)
        .await;

    assert!(matches!(result, Err(ResolveError::ImageNotFound { .. })));
}
