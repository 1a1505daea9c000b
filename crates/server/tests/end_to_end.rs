//! Drives the real upload controller against a running chunk server.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chunkload_protocol::{ApiResponse, MergeRequest, UploadChunkReply};
use chunkload_server::{ChunkServer, ServerConfig};
use chunkload_upload::{
    ChunkTransport, HttpTransport, UploadConfig, UploadController, UploadError, UploadOutcome,
    UploadState,
};
use tokio::net::TcpListener;

struct TestServer {
    server: Arc<ChunkServer>,
    base_url: String,
    root: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let server = ChunkServer::new(ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage_root: root.path().to_path_buf(),
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener).await }
        });
        Self {
            server,
            base_url,
            root,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// Forwards to [`HttpTransport`] while tracking concurrent chunk requests.
struct CountingTransport {
    inner: HttpTransport,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ChunkTransport for CountingTransport {
    fn upload_chunk(
        &self,
        file_name: String,
        chunk_id: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<UploadChunkReply, UploadError>> + Send + '_>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Hold the slot long enough for every worker to overlap.
            tokio::time::sleep(Duration::from_millis(30)).await;
            let result = self.inner.upload_chunk(file_name, chunk_id, data).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn merge(
        &self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        self.inner.merge(request)
    }

    fn upload_file(
        &self,
        file_name: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        self.inner.upload_file(file_name, data)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 255) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_megabytes_in_ten_chunks_with_four_workers() {
    let server = TestServer::start().await;
    let src = tempfile::tempdir().unwrap();
    let data = pattern(10_000_000);
    let path = src.path().join("dataset.bin");
    std::fs::write(&path, &data).unwrap();

    let transport = Arc::new(CountingTransport {
        inner: HttpTransport::new(&server.base_url),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let config = UploadConfig {
        chunk_size: 1_000_000,
        concurrency: 4,
        ..Default::default()
    };
    let controller = UploadController::new(config, transport.clone());

    let session = controller.select_file(&path).await.unwrap();
    assert_eq!(session.chunks_total(), 10);

    let outcome = controller.start().await.unwrap();
    let UploadOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.chunks, 10);
    assert_eq!(transport.peak.load(Ordering::SeqCst), 4);
    assert_eq!(controller.snapshot().await.state, UploadState::Completed);

    let merged = std::fs::read(server.root.path().join("dataset.bin")).unwrap();
    assert_eq!(merged.len(), 10_000_000);
    assert!(merged == data, "merged bytes differ from the source");
    assert!(!server.root.path().join("temp").join("dataset.bin").exists());
}

#[tokio::test]
async fn small_file_is_stored_directly() {
    let server = TestServer::start().await;
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("readme.txt");
    std::fs::write(&path, b"just a few bytes").unwrap();

    let controller = UploadController::new(
        UploadConfig::default(),
        Arc::new(HttpTransport::new(&server.base_url)),
    );
    controller.select_file(&path).await.unwrap();
    let outcome = controller.start().await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));

    let stored = std::fs::read(server.root.path().join("readme.txt")).unwrap();
    assert_eq!(stored, b"just a few bytes");
}

#[tokio::test]
async fn chunk_without_file_name_is_rejected() {
    let server = TestServer::start().await;
    let form = reqwest::multipart::Form::new()
        .part("chunk", reqwest::multipart::Part::bytes(b"abc".to_vec()))
        .text("hash", "fp_0");

    let resp: ApiResponse = reqwest::Client::new()
        .post(format!("{}/upload/chunk", server.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.code, 415);
    assert_eq!(resp.msg.as_deref(), Some("fileName is required"));

    let transport = HttpTransport::new(&server.base_url);
    let err = transport
        .merge(MergeRequest {
            file_name: None,
            ..MergeRequest::new("x", 10)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Server { code: 415, ref msg } if msg == "fileName is required"));
}

#[tokio::test]
async fn re_uploading_a_chunk_is_idempotent() {
    let server = TestServer::start().await;
    let transport = HttpTransport::new(&server.base_url);

    for body in [&b"original"[..], &b"replacement"[..]] {
        let reply = transport
            .upload_chunk("movie.mkv".into(), "fp_0".into(), Bytes::copy_from_slice(body))
            .await
            .unwrap();
        assert!(reply.is_stored());
        assert_eq!(reply.hash, "fp_0");
    }

    let stored = server.server.registry().stored_chunks("movie.mkv").await.unwrap();
    assert_eq!(stored, vec!["fp_0"]);
    let chunk = std::fs::read(server.root.path().join("temp/movie.mkv/fp_0")).unwrap();
    assert_eq!(chunk, b"original");

    transport
        .merge(MergeRequest::new("movie.mkv", 8))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(server.root.path().join("movie.mkv")).unwrap(),
        b"original"
    );
}

#[tokio::test]
async fn merge_of_unknown_file_reports_not_found() {
    let server = TestServer::start().await;
    let err = HttpTransport::new(&server.base_url)
        .merge(MergeRequest::new("never-sent.bin", 1024))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Server { code: 415, ref msg } if msg == "never-sent.bin not found"));
}
