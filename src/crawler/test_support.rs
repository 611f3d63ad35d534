//! Test helpers for transfers that stall mid-body

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves responses whose body stops after `first_chunk` bytes
///
/// The advertised length is twice the first chunk and the remainder never
/// arrives while the connection stays open. Returns the base URL.
pub async fn spawn_stalled_body_server(first_chunk: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {}\r\n\r\n",
                    first_chunk * 2
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&vec![5u8; first_chunk]).await;
                let _ = socket.flush().await;

                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Waits up to five seconds for `path` to hold at least one byte
pub async fn wait_for_bytes(path: &Path) -> bool {
    for _ in 0..500 {
        if std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
