use kvarn_harness_testing::prelude::*;

#[tokio::test]
async fn static_files() {
    let server = ServerBuilder::default().run().await;

    for (path, content_type) in [
        ("hello.html", "text/html"),
        ("style.css", "text/css"),
        ("script.js", "application/javascript"),
        ("data.json", "application/json"),
        ("bytes.bin", "application/octet-stream"),
        ("subdir/notes.txt", "text/plain"),
    ] {
        let on_disk = std::fs::read(server.root().join(path)).unwrap();
        let response = server.get(path).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK, "{path}");
        assert_eq!(response.headers()["content-type"], content_type, "{path}");
        assert_eq!(
            response.headers()["content-length"],
            on_disk.len().to_string().as_str(),
            "{path}"
        );
        assert_eq!(response.headers()["connection"], "close");
        assert_eq!(&response.bytes().await.unwrap()[..], &on_disk[..], "{path}");
    }
}

#[tokio::test]
async fn https() {
    let server = ServerBuilder::default().run().await;

    let on_disk = std::fs::read(server.root().join("bytes.bin")).unwrap();
    let response = server.get_secure("/bytes.bin").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], &on_disk[..]);

    let response = server.get_secure("/echo").send().await.unwrap();
    let echo: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echo["command"], "GET");
    assert_eq!(echo["url"], "/echo");
}

#[tokio::test]
async fn head() {
    let server = ServerBuilder::default().run().await;

    let response = server.head("/hello.html").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let len = std::fs::metadata(server.root().join("hello.html"))
        .unwrap()
        .len();
    assert_eq!(
        response.headers()["content-length"],
        len.to_string().as_str()
    );
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn delays_are_independent() {
    let server = ServerBuilder::default().run().await;

    let start = Instant::now();
    let slow = server.get("/delay?500").send();
    let fast = async {
        let response = server.get("/delay?0").send().await.unwrap();
        let text = response.text().await.unwrap();
        (text, start.elapsed())
    };
    let (slow, (fast, fast_elapsed)) = tokio::join!(slow, fast);

    assert_eq!(fast, "OK (0ms delayed)\n");
    assert!(
        fast_elapsed < Duration::from_millis(400),
        "fast request took {fast_elapsed:?}"
    );
    assert_eq!(slow.unwrap().text().await.unwrap(), "OK (500ms delayed)\n");
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn echo_post() {
    let server = ServerBuilder::default().run().await;

    let response = server
        .post("/echo?a=1#ignored")
        .header("x-custom", "value   ")
        .body("field=value")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    // from the package unit
    assert_eq!(response.headers()["x-fixture-package"], "harness");
    assert_eq!(response.headers()["x-fixture-source"], "package");

    let echo: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echo["command"], "POST");
    assert_eq!(echo["version"], "HTTP/1.1");
    assert_eq!(echo["url"], "/echo?a=1");
    assert_eq!(echo["path"], "/echo");
    assert_eq!(echo["query"], "a=1");
    assert_eq!(echo["origin"][0], "127.0.0.1");
    assert_eq!(echo["headers"]["x-custom"], "value");
    assert_eq!(echo["headers"]["content-length"], "11");
    assert_eq!(echo["postdata"], "field=value");
}

#[tokio::test]
async fn status_handler() {
    let server = ServerBuilder::default().run().await;

    let response = server
        .get("/status?status=418&x-extra=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.headers()["x-extra"], "1");
    let body = response.text().await.unwrap();
    assert!(body.contains("<h1>Status: 418</h1>"), "{body}");

    let response = server.get("/status?404").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = server
        .get("/status?Content-Type=text/plain")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirects_directories() {
    let server = ServerBuilder::default().run().await;

    let response = server.get("/subdir").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()["location"], "/subdir/");

    let response = server.get("/subdir/").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("Subdirectory index"));
}

#[tokio::test]
async fn not_found() {
    let server = ServerBuilder::default().run().await;

    let response = server.get("/missing.html").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("File not found: /missing.html"));
}

#[tokio::test]
async fn environment() {
    let server = ServerBuilder::default().run().await;
    let ports = server.ports();
    assert_ne!(ports.http, ports.https);

    let environment = server.running().environment();
    assert_eq!(environment[0].0, "TEST_HTTP_BASE");
    assert_eq!(
        environment[0].1,
        format!("http://localhost:{}/", ports.http)
    );
    assert_eq!(environment[1].0, "TEST_HTTPS_BASE");
    assert_eq!(
        environment[1].1,
        format!("https://localhost:{}/", ports.https)
    );
}

#[tokio::test]
async fn graceful_shutdown() {
    let server = ServerBuilder::default()
        .shutdown_grace(Duration::from_secs(2))
        .run()
        .await;
    let manager = Arc::clone(server.running().manager());
    assert_eq!(manager.state(), shutdown::State::Running);

    let url = server.url("/delay?300");
    let client = server.client().build().unwrap();
    let in_flight = tokio::spawn(async move { client.get(url).send().await });

    // let the request reach the handler
    tokio::time::sleep(Duration::from_millis(100)).await;
    let port = server.ports().http;
    tokio::time::timeout(Duration::from_secs(3), server.shutdown())
        .await
        .unwrap();
    assert_eq!(manager.state(), shutdown::State::Stopped);
    assert_eq!(manager.connections(), 0);

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.text().await.unwrap(), "OK (300ms delayed)\n");

    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .is_err());
}
