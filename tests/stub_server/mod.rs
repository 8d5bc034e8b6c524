#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// What a handler sends back: status, body, content type.
pub type Reply = (u16, String, &'static str);

/// Small HTTP server on a background thread. Every request goes through
/// `handler(method, path, body)`.
pub struct StubServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, &str) -> Reply + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let base_url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let method = request.method().to_string();
                let path = request.url().to_owned();
                let (status, text, content_type) = handler(&method, &path, &body);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_string(text)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

const INDEX_HTML: &str = r#"<html><head><meta charset="utf-8">
<meta property="og:novel:book_name" content="武动乾坤">
<meta property="og:novel:author" content="天蚕土豆">
</head><body><div id="list"><dl>
<dd><a href="/book/7/101.html">第一章 林动</a></dd>
<dd><a href="/book/7/102.html">第二章 武祖</a></dd>
</dl></div></body></html>"#;

fn chapter_html(title: &str, body: &str) -> String {
    format!(
        r#"<html><head><meta charset="utf-8"></head><body><h1>{title}</h1>
<div id="content">{body}<script>ads()</script></div></body></html>"#
    )
}

/// A two-chapter novel site at `/book/7/`.
pub fn novel_site() -> StubServer {
    StubServer::spawn(|method, path, _body| {
        let html = "text/html; charset=utf-8";
        if method != "GET" {
            return (405, "method not allowed".to_owned(), "text/plain");
        }
        match path {
            "/book/7/" => (200, INDEX_HTML.to_owned(), html),
            "/book/7/101.html" => (
                200,
                chapter_html("第一章 林动", "林动站在山巅。<br>他修炼武祖之道。"),
                html,
            ),
            "/book/7/102.html" => (
                200,
                chapter_html("第二章 武祖", "武祖之名传遍大炎王朝。"),
                html,
            ),
            _ => (404, "not found".to_owned(), "text/plain"),
        }
    })
}

fn chat_reply(text: &str) -> Reply {
    let body = serde_json::json!({
        "id": "chatcmpl-stub",
        "object": "chat.completion",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }
        ]
    });
    (200, body.to_string(), "application/json")
}

/// OpenAI-compatible `/v1/chat/completions`. Translations come back as
/// `VI <source>`; glossary requests get a fixed JSON list.
pub fn chat_stub() -> StubServer {
    StubServer::spawn(|method, path, body| {
        if method != "POST" || path != "/v1/chat/completions" {
            return (404, "not found".to_owned(), "text/plain");
        }
        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            return (400, "invalid json".to_owned(), "text/plain");
        };
        let message = |i: usize| {
            parsed
                .pointer(&format!("/messages/{i}/content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let (system, user) = (message(0), message(1));

        if system.contains("JSON") {
            return chat_reply(
                "```json\n[{\"chinese\":\"林动\",\"vietnamese\":\"Lâm Động\",\"category\":\"character\"},\
{\"chinese\":\"武祖\",\"vietnamese\":\"Võ Tổ\",\"category\":\"realm\"}]\n```",
            );
        }
        if let Some(title) = user.strip_prefix("Dịch: ") {
            return chat_reply(&format!("VI {title}"));
        }
        match user.split_once("## Văn bản cần dịch\n") {
            Some((_, text)) => chat_reply(&format!("VI {text}")),
            None => (400, "unknown prompt".to_owned(), "text/plain"),
        }
    })
}
