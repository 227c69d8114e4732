//! Gateway Server
//!
//! Accept loop shared by both modes: optional TLS handshake, HTTP/1 and
//! HTTP/2 via hyper-util, peer address injected as `ConnectInfo`. On
//! shutdown the listener is closed and open connections get a bounded drain.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::ConnectInfo, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use crate::bootstrap::GatewayListener;
use crate::error::Result;

/// Upper bound on draining open connections at shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, e.g. when out of file descriptors
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: GatewayListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (tcp, tls) = listener.into_parts();
    let tracker = TaskTracker::new();
    let closing = CancellationToken::new();
    tokio::pin!(shutdown);

    loop {
        let listener = &tcp;
        let (stream, peer) = tokio::select! {
            accepted = next_connection(move || listener.accept()) => accepted,
            _ = &mut shutdown => break,
        };

        let router = router.clone();
        let tls = tls.clone();
        let closing = closing.clone();
        tracker.spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, peer, router, closing).await,
                    Err(e) => tracing::debug!("TLS handshake with {} failed: {}", peer, e),
                },
                None => serve_connection(stream, peer, router, closing).await,
            }
        });
    }

    drop(tcp);
    tracker.close();
    closing.cancel();

    if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
        tracing::warn!(
            "Failed to drain {} connection(s) within {:?}, exiting anyway",
            tracker.len(),
            DRAIN_TIMEOUT
        );
    }

    Ok(())
}

/// Retry `accept` until it yields a connection, backing off after each error
async fn next_connection<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::debug!("Accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_connection<S>(stream: S, peer: SocketAddr, router: Router, closing: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = closing.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        tracing::debug!("Connection from {} ended: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn echo_peer(ConnectInfo(peer): ConnectInfo<SocketAddr>) -> String {
        peer.ip().to_string()
    }

    #[tokio::test]
    async fn test_serves_and_shuts_down() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = GatewayListener::new(tcp, None).unwrap();
        let addr = listener.config().bind_addr;
        let router = Router::new().route("/", get(echo_peer));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("127.0.0.1"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_back_off() {
        let mut failures = 3;
        let started = tokio::time::Instant::now();

        let accepted = next_connection(|| {
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::from_raw_os_error(24))
            } else {
                Ok(7)
            };
            async move { result }
        })
        .await;

        assert_eq!(accepted, 7);
        assert!(started.elapsed() >= ACCEPT_BACKOFF * 3);
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_shutdown() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = GatewayListener::new(tcp, None).unwrap();
        let addr = listener.config().bind_addr;
        let router = Router::new().route("/", get(echo_peer));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router, async {
            let _ = stop_rx.await;
        }));

        // Keep-alive connection left open after one request
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0);

        let started = std::time::Instant::now();
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(started.elapsed() < DRAIN_TIMEOUT);
    }
}
