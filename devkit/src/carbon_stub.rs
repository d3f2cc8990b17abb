/*!
Mock carbon line receiver

Accepts plaintext protocol connections and records every received line.
*/

use anyhow::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct MockCarbon {
    address: SocketAddr,
    lines: Arc<Mutex<Vec<String>>>,
    server: Option<JoinHandle<()>>,
}

impl MockCarbon {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let lines = Arc::new(Mutex::new(Vec::new()));

        let received = lines.clone();
        let server = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("[MOCK CARBON] accept failed: {}", e);
                        break;
                    }
                };
                let received = received.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        received.lock().push(line);
                    }
                    log::info!("📊 [MOCK CARBON] connection from {} closed", peer);
                });
            }
        });

        log::info!("🧪 [MOCK CARBON] listening on {}", address);
        Ok(Self { address, lines, server: Some(server) })
    }

    pub fn host(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Lines received so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Wait until at least `count` lines arrived or `timeout` elapsed, then
    /// return what was received.
    pub async fn wait_for_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.lines.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let lines = self.lines();
        if lines.len() < count {
            log::warn!("⏰ [MOCK CARBON] expected {} lines, got {}", count, lines.len());
        }
        lines
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Stop accepting connections
    pub async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
    }
}

impl Drop for MockCarbon {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_records_lines() {
        let carbon = MockCarbon::start().await.unwrap();
        let mut stream = TcpStream::connect(format!("{}:{}", carbon.host(), carbon.port())).await.unwrap();
        stream.write_all(b"a.b 1 100\na.c 2 100\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let lines = carbon.wait_for_lines(2, Duration::from_secs(2)).await;
        assert_eq!(lines, vec!["a.b 1 100", "a.c 2 100"]);

        carbon.clear();
        assert!(carbon.lines().is_empty());
    }
}
