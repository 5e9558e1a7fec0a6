//! In-process HTTP stub for provider tests.
//!
//! Serves canned responses over a real TCP socket so the reqwest-based
//! providers can be exercised end to end without a live backend. Every
//! request (head plus body) is recorded for assertions about which calls
//! were or were not made.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub(crate) struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    /// Full text (request line, headers, body) of every request received,
    /// in arrival order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

/// Start a stub answering on a random local port. Each inbound request is
/// matched against `routes` by substring over the full request text; the
/// first match decides the status and body, no match answers 404.
pub(crate) async fn spawn_stub(routes: Vec<(String, u16, String)>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let Some(request) = read_request(&mut socket).await else {
                continue;
            };
            log.lock().await.push(request.clone());

            let (status, body) = routes
                .iter()
                .find(|(pattern, _, _)| request.contains(pattern))
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or((404, String::new()));
            let response = format!(
                "HTTP/1.1 {} STUB\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    StubServer { base_url, requests }
}

/// Read one HTTP/1.1 request: head up to the blank line, then as many body
/// bytes as Content-Length announces.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text
                .lines()
                .find_map(|line| {
                    let line = line.to_ascii_lowercase();
                    line.strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if raw.len() - (head_end + 4) >= content_length {
                return Some(text);
            }
        }
    }
}
