mod common;

use std::time::Duration;

use caption_engine::{
    EngineEvent, FailureKind, FetchSettings, Fetcher, RecordProgress, ReqwestFetcher, Stage,
};
use common::{jpeg_bytes, png_bytes, TestSink};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(settings: FetchSettings) -> ReqwestFetcher {
    ReqwestFetcher::new(settings).expect("client builds")
}

#[tokio::test]
async fn fetcher_returns_image_bytes_and_emits_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(), "image/png"))
        .mount(&server)
        .await;

    let fetcher = fetcher(FetchSettings::default());
    let sink = TestSink::new();
    let url = format!("{}/a.png", server.uri());

    let output = fetcher.fetch(1, &url, &sink).await.expect("fetch ok");
    assert_eq!(output.metadata.original_url, url);
    assert_eq!(output.metadata.final_url, output.metadata.original_url);
    assert_eq!(output.metadata.content_type.as_deref(), Some("image/png"));
    assert_eq!(output.metadata.byte_len, png_bytes().len() as u64);
    assert_eq!(output.bytes, png_bytes());

    let progress = sink
        .take()
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::Progress(RecordProgress { stage, .. }) => Some(stage),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert!(progress.contains(&Stage::Downloading));
}

#[tokio::test]
async fn fetcher_accepts_octet_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(jpeg_bytes(), "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/b.jpg", server.uri());
    let output = fetcher(FetchSettings::default())
        .fetch(2, &url, &TestSink::new())
        .await
        .expect("fetch ok");
    assert_eq!(output.bytes, jpeg_bytes());
}

#[tokio::test]
async fn fetcher_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing.jpg", server.uri());
    let err = fetcher(FetchSettings::default())
        .fetch(7, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus { status: 404 });
}

#[tokio::test]
async fn fetcher_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_raw(png_bytes(), "image/png"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let url = format!("{}/slow.png", server.uri());
    let err = fetcher(settings)
        .fetch(2, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn fetcher_rejects_too_large_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(), "image/png"))
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 10,
        ..FetchSettings::default()
    };
    let url = format!("{}/large.png", server.uri());
    let err = fetcher(settings)
        .fetch(3, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(png_bytes().len() as u64)
        }
    );
}

#[tokio::test]
async fn fetcher_rejects_html_error_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>sign in</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/login.jpg", server.uri());
    let err = fetcher(FetchSettings::default())
        .fetch(4, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::UnsupportedContentType {
            content_type: "text/html".to_string()
        }
    );
}

#[tokio::test]
async fn fetcher_rejects_bodies_that_are_not_images() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fake.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("not really a png", "image/png"))
        .mount(&server)
        .await;

    let url = format!("{}/fake.png", server.uri());
    let err = fetcher(FetchSettings::default())
        .fetch(5, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::NotAnImage);

    let lenient = FetchSettings {
        verify_images: false,
        ..FetchSettings::default()
    };
    let output = fetcher(lenient)
        .fetch(5, &url, &TestSink::new())
        .await
        .expect("signature check disabled");
    assert_eq!(output.bytes, b"not really a png");
}

#[tokio::test]
async fn fetcher_rejects_truncated_images() {
    let server = MockServer::start().await;
    let mut truncated = png_bytes();
    truncated.truncate(truncated.len() / 2);
    Mock::given(method("GET"))
        .and(path("/cut.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(truncated, "image/png"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stub.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xD8, 0xFF], "image/jpeg"),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher(FetchSettings::default());
    for route in ["/cut.png", "/stub.jpg"] {
        let url = format!("{}{route}", server.uri());
        let err = fetcher.fetch(9, &url, &TestSink::new()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NotAnImage, "{route}");
    }
}

#[tokio::test]
async fn fetcher_rejects_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(Vec::<u8>::new(), "image/jpeg"))
        .mount(&server)
        .await;

    let url = format!("{}/empty.jpg", server.uri());
    let err = fetcher(FetchSettings::default())
        .fetch(6, &url, &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::EmptyBody);
}

#[tokio::test]
async fn fetcher_rejects_invalid_url() {
    let err = fetcher(FetchSettings::default())
        .fetch(8, "not a url.jpg", &TestSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}
