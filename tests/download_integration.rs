use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use anistream::download::{DownloadError, Downloader, episode_path};

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("anistream-dl-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test]
async fn test_download_writes_file_and_reports_progress() {
    let mock_server = MockServer::start().await;
    let body = vec![7u8; 64 * 1024];

    Mock::given(method("GET"))
        .and(path("/animes/frieren/1/1080.mp4"))
        .and(header("Referer", "https://yeshi.eu.org/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&mock_server)
        .await;

    let dir = scratch_dir("ok");
    let dest = episode_path(&dir, "Frieren", "Season 1, Episode 3");
    let downloader = Downloader::new("anistream-test", "https://yeshi.eu.org/");

    let mut reports = Vec::new();
    let written = downloader
        .download(
            &format!("{}/animes/frieren/1/1080.mp4", mock_server.uri()),
            &dest,
            |done, total| reports.push((done, total)),
        )
        .await
        .unwrap();

    assert_eq!(written, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!dest.with_extension("part").exists());
    assert_eq!(
        reports.last(),
        Some(&(body.len() as u64, Some(body.len() as u64)))
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_download_http_error_leaves_nothing_behind() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = scratch_dir("missing");
    let dest = episode_path(&dir, "Frieren", "Season 1, Episode 4");
    let downloader = Downloader::new("anistream-test", "https://yeshi.eu.org/");

    let err = downloader
        .download(&format!("{}/gone.mp4", mock_server.uri()), &dest, |_, _| {})
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Status { status: 404, .. }));
    assert!(!dest.exists());
    assert!(!dest.with_extension("part").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_failed_download_removes_partial_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4096]))
        .mount(&mock_server)
        .await;

    // a directory in the way makes the final rename fail after the body is written
    let dir = scratch_dir("blocked");
    let dest = episode_path(&dir, "Frieren", "Season 1, Episode 5");
    std::fs::create_dir_all(dest.join("occupied")).unwrap();
    let downloader = Downloader::new("anistream-test", "https://yeshi.eu.org/");

    let err = downloader
        .download(&format!("{}/ep5.mp4", mock_server.uri()), &dest, |_, _| {})
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Io(_)));
    assert!(!dest.with_extension("part").exists());
    assert!(dest.join("occupied").is_dir());

    let _ = std::fs::remove_dir_all(&dir);
}
