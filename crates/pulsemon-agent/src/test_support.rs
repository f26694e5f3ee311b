use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use pulsemon_common::codec::gunzip;
use pulsemon_common::signing::HASH_HEADER;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub content_encoding: Option<String>,
    pub signature: Option<String>,
    /// Request body after gzip decoding.
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct Recorder {
    hits: Arc<Mutex<Vec<Hit>>>,
    seen: Arc<AtomicUsize>,
    fail_first: usize,
    delay: Duration,
}

pub struct CollectorServer {
    pub base_url: String,
    recorder: Recorder,
}

impl CollectorServer {
    pub fn hits(&self) -> Vec<Hit> {
        self.recorder.hits.lock().unwrap().clone()
    }
}

async fn record(
    State(rec): State<Recorder>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    tokio::time::sleep(rec.delay).await;
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_encoding = header("content-encoding");
    let body = if content_encoding.as_deref() == Some("gzip") {
        gunzip(&body).unwrap()
    } else {
        body.to_vec()
    };
    rec.hits.lock().unwrap().push(Hit {
        path: uri.path().to_string(),
        content_encoding,
        signature: header(HASH_HEADER),
        body,
    });

    let n = rec.seen.fetch_add(1, Ordering::SeqCst);
    if n < rec.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Starts a throwaway HTTP server that records every request and answers
/// 500 to the first `fail_first` of them.
pub async fn spawn_collector(fail_first: usize) -> CollectorServer {
    serve(fail_first, Duration::ZERO).await
}

/// Like [`spawn_collector`], but holds every request for `delay` before
/// answering 200.
pub async fn spawn_slow_collector(delay: Duration) -> CollectorServer {
    serve(0, delay).await
}

async fn serve(fail_first: usize, delay: Duration) -> CollectorServer {
    let recorder = Recorder {
        hits: Arc::new(Mutex::new(Vec::new())),
        seen: Arc::new(AtomicUsize::new(0)),
        fail_first,
        delay,
    };
    let app = Router::new().fallback(record).with_state(recorder.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    CollectorServer {
        base_url: format!("http://{addr}"),
        recorder,
    }
}
