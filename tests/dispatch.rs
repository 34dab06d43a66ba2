use kvarn_harness::prelude::threading::*;
use kvarn_harness_testing::prelude::*;

/// Sends `request` as-is and reads the response until the server closes the connection.
async fn raw(server: &Server, request: &[u8]) -> String {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", server.ports().http))
        .await
        .unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(response).unwrap()
}

struct Counted(Arc<AtomicUsize>);
impl Handler for Counted {
    fn handle<'a>(&'a self, _: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(Bytes::from_static(b"counted\n")))
        })
    }
}

fn counting_server(calls: &Arc<AtomicUsize>) -> ServerBuilder {
    let handler = Arc::new(Counted(Arc::clone(calls)));
    ServerBuilder::default().with_catalog(move |catalog| {
        catalog.insert_handler("counted", handler);
    })
}

#[tokio::test]
async fn invalid_content_length() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = counting_server(&calls).run().await;

    let response = raw(
        &server,
        b"POST /counted HTTP/1.1\r\nHost: localhost\r\nContent-Length: abc\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(
        response.ends_with("No or invalid Content-Length in POST (\"abc\")"),
        "{response}"
    );

    let response = raw(&server, b"POST /counted HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.ends_with("(None)"), "{response}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let response = raw(
        &server,
        b"POST /counted HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\n\r\nbody",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("counted\n"), "{response}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let server = ServerBuilder::default().run().await;

    let response = raw(
        &server,
        b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 99999999999999999\r\n\r\nabc",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");

    // the server survives and keeps serving
    let response = raw(&server, b"GET /hello.html HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
}

#[tokio::test]
async fn older_versions() {
    let server = ServerBuilder::default().run().await;

    let response = raw(&server, b"GET /hello.html HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("<h1>Hello</h1>"));

    // a request line without a version is a whole request
    let response = raw(&server, b"GET /hello.html\r\n").await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("<h1>Hello</h1>"));

    let response = raw(&server, b"GET /hello.html HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
}

#[tokio::test]
async fn traversal_stays_in_root() {
    let server = ServerBuilder::default().run().await;

    for target in [
        "/../Cargo.toml",
        "/../../Cargo.toml",
        "/subdir/../../Cargo.toml",
        "/%2e%2e/Cargo.toml",
        "/..%2f..%2fCargo.toml",
        "//../server.rs",
    ] {
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let response = raw(&server, request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 404"), "{target}: {response}");
    }

    // collapsing `..` still finds files inside the root
    let response = raw(
        &server,
        b"GET /subdir/../hello.html HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("<h1>Hello</h1>"));
}

#[tokio::test]
async fn handler_sources_are_not_served() {
    let server = ServerBuilder::default().run().await;

    for path in ["/echo.hook", "/Echo.Hook", "/__init__.hook", "/__init__", "/counted.hook"] {
        let response = server.get(path).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND, "{path}");
    }
    // ...while the handler itself answers
    let response = server.get("/echo").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn unsupported_method() {
    let server = ServerBuilder::default().run().await;

    let response = server.put("/hello.html").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_IMPLEMENTED);

    let response = raw(&server, b"BREW /pot HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 501"), "{response}");
}

#[tokio::test]
async fn malformed_head() {
    let server = ServerBuilder::default().run().await;

    let response = raw(&server, b"GET /hello.html HTTP/1.1\r\nno colon here\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    // nothing is sent back to a client closing the connection without a request
    let response = raw(&server, b"").await;
    assert!(response.is_empty());
}

#[tokio::test]
async fn handler_faults() {
    let faults = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&faults);
    let server = ServerBuilder::default()
        .error_sink(move |fault| sink.lock().unwrap().push(fault.to_string()))
        .run()
        .await;

    let response = server.get("/broken").send().await.unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("Internal Server Error in"));

    // no handler named `counted` in the default catalog
    let response = server.get("/counted").send().await.unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );

    // the server keeps serving
    let response = server.get("/hello.html").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 2, "{faults:?}");
    assert!(faults[0].contains("broken.hook"), "{}", faults[0]);
    assert!(faults[1].contains("counted"), "{}", faults[1]);
}

#[tokio::test]
async fn panicking_handler() {
    struct Panics;
    impl Handler for Panics {
        fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
            box_fut!({
                if request.query() == "panic" {
                    panic!("fixture panicked");
                }
                Ok(Response::new(Bytes::new()))
            })
        }
    }

    let server = ServerBuilder::default()
        .with_catalog(|catalog| {
            catalog.insert_handler("counted", Arc::new(Panics));
        })
        .run()
        .await;

    let response = server.get("/counted?panic").send().await.unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    let response = server.get("/counted").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let response = server.get("/hello.html").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}
