use pretty_assertions::assert_eq;
use richtext_img::{
    cdn::{CdnService, FnUploader, MockCdnClient},
    markup::{HtmlDocument, MarkupDocument},
    scratch::ScratchArea,
    source::{HttpSource, MockImageSource, MockResponse},
    CancellationToken, ErrorKind, ImageReplacer, ReplacerConfig, ReplacerServices,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

fn image(content_type: &str, body: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", content_type)
        .set_body_bytes(body.to_vec())
}

fn http_replacer(config: ReplacerConfig, cdn: Arc<dyn CdnService>, scratch: ScratchArea) -> ImageReplacer {
    let source = Arc::new(HttpSource::new(&config));
    ImageReplacer::with_scratch(config, ReplacerServices { source, cdn }, scratch).unwrap()
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(files_under(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}

#[tokio::test]
async fn test_png_is_uploaded_and_rewritten() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(image("image/png", PNG))
        .expect(1)
        .mount(&server)
        .await;

    let scratch_base = tempfile::tempdir().unwrap();
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let recorded = uploads.clone();
    let cdn = Arc::new(FnUploader::new(move |path: &Path| {
        recorded
            .lock()
            .unwrap()
            .push(std::fs::read(path).map_err(richtext_img::Error::Io)?);
        Ok("https://cdn/x.png".to_string())
    }));

    let replacer = http_replacer(
        ReplacerConfig::new(),
        cdn,
        ScratchArea::in_dir(scratch_base.path()),
    );
    let html = format!(r#"<p><img src="{}/a.png"></p>"#, server.uri());
    let output = replacer.replace(&html).await.unwrap();

    assert_eq!(output, r#"<p><img src="https://cdn/x.png"></p>"#);
    assert_eq!(*uploads.lock().unwrap(), vec![PNG.to_vec()]);

    // The uploaded copy is gone once the callback returns.
    let scratch_dir = replacer.scratch().current().await.unwrap();
    assert!(files_under(&scratch_dir).is_empty());

    replacer.cleanup().await.unwrap();
    assert!(!scratch_dir.exists());
}

#[tokio::test]
async fn test_not_found_is_fetched_once_and_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new();
    let replacer = http_replacer(ReplacerConfig::new(), Arc::new(cdn.clone()), ScratchArea::new());
    let html = format!(r#"<p><img src="{}/gone.png" alt="x"></p>"#, server.uri());

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.markup, html);
    assert_eq!(report.total, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::Network);
    assert_eq!(report.failures[0].attempts, 1);
    assert_eq!(cdn.get_upload_count(), 0);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let replacer = http_replacer(
        ReplacerConfig::new().with_max_retries(2),
        Arc::new(MockCdnClient::new()),
        ScratchArea::new(),
    );
    let html = format!(r#"<img src="{}/flaky.png">"#, server.uri());

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.markup, html);
    assert_eq!(report.failures[0].attempts, 3);
    assert!(report.failures[0].message.contains("503"));
}

#[tokio::test]
async fn test_server_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/later.png"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/later.png"))
        .respond_with(image("image/png", PNG))
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new().with_base_url("https://cdn.test".to_string());
    let replacer = http_replacer(ReplacerConfig::new(), Arc::new(cdn.clone()), ScratchArea::new());
    let html = format!(r#"<img src="{}/later.png">"#, server.uri());

    let output = replacer.replace(&html).await.unwrap();

    assert!(output.contains("https://cdn.test/"));
    assert_eq!(cdn.get_upload_count(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_jpeg_bytes_declared_as_png_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/liar.png"))
        .respond_with(image("image/png", JPEG))
        .expect(1)
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new();
    let replacer = http_replacer(ReplacerConfig::new(), Arc::new(cdn.clone()), ScratchArea::new());
    let html = format!(r#"<img src="{}/liar.png">"#, server.uri());

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.markup, html);
    assert_eq!(report.failures[0].kind, ErrorKind::InvalidContent);
    assert_eq!(report.failures[0].attempts, 1);
    assert_eq!(cdn.get_upload_count(), 0);
}

#[tokio::test]
async fn test_oversized_and_unsupported_images() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.png"))
        .respond_with(image("image/png", &[PNG, &[0u8; 4096][..]].concat()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.png"))
        .respond_with(image("text/html; charset=utf-8", b"<html></html>"))
        .mount(&server)
        .await;

    let replacer = http_replacer(
        ReplacerConfig::new().with_max_bytes(1024),
        Arc::new(MockCdnClient::new()),
        ScratchArea::new(),
    );
    let html = format!(
        r#"<img src="{0}/big.png"><img src="{0}/page.png">"#,
        server.uri()
    );

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.markup, html);
    let kinds: Vec<ErrorKind> = report.failures.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::TooLarge, ErrorKind::UnsupportedType]);
}

#[tokio::test]
async fn test_mixed_document_keeps_order_and_untouched_parts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/one.png"))
        .respond_with(image("image/png", PNG))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/three.jpg"))
        .respond_with(image("image/jpeg", JPEG))
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new().with_base_url("https://cdn.test".to_string());
    let replacer = http_replacer(
        ReplacerConfig::new().with_concurrency(2),
        Arc::new(cdn.clone()),
        ScratchArea::new(),
    );
    let uri = server.uri();
    let html = format!(
        r#"<h1>Post</h1><img src="/local/logo.png"><p><img src="{uri}/one.png" class="a"></p><img src="{uri}/two.jpg"><figure><img src="{uri}/three.jpg"></figure><img src="data:image/gif;base64,R0lGODlh">"#
    );

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(cdn.get_upload_count(), 2);

    let doc = HtmlDocument::parse(&report.markup).unwrap();
    let srcs: Vec<String> = doc.image_refs().iter().map(|r| r.src.clone()).collect();
    assert_eq!(srcs.len(), 5);
    assert_eq!(srcs[0], "/local/logo.png");
    assert!(srcs[1].starts_with("https://cdn.test/") && srcs[1].ends_with(".png"));
    assert_eq!(srcs[2], format!("{}/two.jpg", uri));
    assert!(srcs[3].starts_with("https://cdn.test/") && srcs[3].ends_with(".jpg"));
    assert_eq!(srcs[4], "data:image/gif;base64,R0lGODlh");

    assert!(report.markup.starts_with("<h1>Post</h1>"));
    assert!(report.markup.contains(r#"class="a""#));
    assert_eq!(report.failures[0].index, 1);
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(image("image/png", PNG))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/cdn/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new().with_base_url(format!("{}/cdn", server.uri()));
    let replacer = http_replacer(ReplacerConfig::new(), Arc::new(cdn.clone()), ScratchArea::new());
    let html = format!(r#"<p><img src="{}/a.png"></p>"#, server.uri());

    let first = replacer.replace(&html).await.unwrap();
    assert_ne!(first, html);

    let second = replacer.replace(&first).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(cdn.get_upload_count(), 1);
}

#[tokio::test]
async fn test_second_pass_over_uploaded_paths_sends_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(image("image/png", PNG))
        .expect(1)
        .mount(&server)
        .await;

    let cdn = Arc::new(FnUploader::new(|_: &Path| Ok("/uploads/x.png".to_string())));
    let replacer = http_replacer(ReplacerConfig::new(), cdn, ScratchArea::new());
    let html = format!(r#"<p><img src="{}/a.png"></p>"#, server.uri());

    let first = replacer.replace(&html).await.unwrap();
    assert_eq!(first, r#"<p><img src="/uploads/x.png"></p>"#);

    let second = replacer.replace(&first).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    replacer.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_entity_encoded_query_is_requested_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/q.png"))
        .and(query_param("a", "1"))
        .and(query_param("b", "2"))
        .respond_with(image("image/png", PNG))
        .expect(1)
        .mount(&server)
        .await;

    let cdn = Arc::new(FnUploader::new(|_: &Path| Ok("https://cdn/q.png".to_string())));
    let replacer = http_replacer(ReplacerConfig::new(), cdn, ScratchArea::new());
    let html = format!(r#"<img alt="a &amp; b" src="{}/q.png?a=1&amp;b=2">"#, server.uri());

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.markup, r#"<img alt="a &amp; b" src="https://cdn/q.png">"#);
    replacer.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_markup_without_remote_images_is_returned_verbatim() {
    let server = MockServer::start().await;
    let replacer = http_replacer(
        ReplacerConfig::new(),
        Arc::new(MockCdnClient::new()),
        ScratchArea::new(),
    );

    let html = "<div>\n  <IMG SRC=\"./a.png\">  <p>text &amp; more</p>\n</div>";
    let output = replacer.replace(html).await.unwrap();

    assert_eq!(output, html);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(replacer.scratch().current().await.is_none());
}

#[tokio::test]
async fn test_concurrency_limit_holds_across_a_large_batch() {
    let mut source = MockImageSource::new().with_delay(Duration::from_millis(20));
    let mut html = String::new();
    for i in 0..20 {
        let url = format!("https://img{}.example.com/{}.png", i % 4, i);
        source = source.with_response(&url, MockResponse::image("image/png", PNG.to_vec()));
        html.push_str(&format!(r#"<img src="{}">"#, url));
    }

    let cdn = MockCdnClient::new();
    let replacer = ImageReplacer::with_services(
        ReplacerConfig::new().with_concurrency(4),
        ReplacerServices {
            source: Arc::new(source.clone()),
            cdn: Arc::new(cdn.clone()),
        },
    )
    .unwrap();

    let report = replacer
        .replace_with_report(&html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 20);
    assert_eq!(cdn.get_upload_count(), 20);
    assert!(source.get_peak_in_flight() <= 4);
    assert_eq!(source.get_total_calls(), 20);
}

#[tokio::test]
async fn test_one_shot_replace_function() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(image("image/png", PNG))
        .mount(&server)
        .await;

    let cdn = MockCdnClient::new().with_base_url("https://cdn.test".to_string());
    let html = format!(r#"<img src="{}/a.png">"#, server.uri());

    let output = richtext_img::replace(
        &html,
        ReplacerConfig::new(),
        Arc::new(cdn.clone()),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.starts_with(r#"<img src="https://cdn.test/"#));
    assert_eq!(cdn.get_upload_count(), 1);
}

#[tokio::test]
async fn test_refused_connection_is_a_retried_network_failure() {
    let replacer = http_replacer(
        ReplacerConfig::new().with_max_retries(1),
        Arc::new(MockCdnClient::new()),
        ScratchArea::new(),
    );
    let html = r#"<img src="http://127.0.0.1:1/a.png">"#;

    let report = replacer
        .replace_with_report(html, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.markup, html);
    assert_eq!(report.failures[0].kind, ErrorKind::Network);
    assert_eq!(report.failures[0].attempts, 2);
}
