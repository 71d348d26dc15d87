//! Mock variants server shared by integration tests.

#![allow(dead_code)]

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const API_KEY: &str = "k1";

/// Mock server driven from synchronous tests.
///
/// The client under test uses blocking I/O, so tests run on plain threads and only enter the
/// runtime to talk to the mock.
pub struct TestServer {
    // Declared before the runtime, so it is dropped first.
    server: MockServer,
    runtime: tokio::runtime::Runtime,
}

impl TestServer {
    pub fn start() -> TestServer {
        let _ = env_logger::builder().is_test(true).try_init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(MockServer::start());
        TestServer { server, runtime }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answer every variants request with `status` and `body`. Replaces previous responses and
    /// forgets received requests.
    pub fn respond_with(&self, status: u16, body: &str) {
        self.mount(ResponseTemplate::new(status).set_body_string(body.to_owned()));
    }

    /// Answer every variants request with `body` after `delay`.
    pub fn respond_after(&self, delay: Duration, body: &str) {
        self.mount(
            ResponseTemplate::new(200)
                .set_body_string(body.to_owned())
                .set_delay(delay),
        );
    }

    fn mount(&self, response: ResponseTemplate) {
        self.runtime.block_on(async {
            self.server.reset().await;
            Mock::given(method("GET"))
                .and(path_regex("^/sdk/vardata/[A-Za-z0-9_-]+$"))
                .respond_with(response)
                .mount(&self.server)
                .await;
        });
    }

    pub fn requests(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }
}

/// Decode the user sent in the path of a variants request.
pub fn requested_user(request: &Request) -> serde_json::Value {
    let encoded = request
        .url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap()
}

pub fn authorization(request: &Request) -> &str {
    request
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
}
