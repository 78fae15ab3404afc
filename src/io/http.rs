use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

use super::SourceFile;
use anyhow::{Result, bail};

/// Upper bound on the buffer reserved from a server-declared length.
const MAX_PREALLOC: u64 = 64 << 20;

/// Fetches a remote file so it can be staged like a dropped one.
///
/// When the server advertises byte ranges, a dropped connection resumes from
/// the last received byte instead of starting over. A range response that
/// carries no data counts as a failed attempt.
pub struct HttpSource {
    client: Client,
    url: String,
    max_retry: u32,
    retry_delay: Duration,
}

impl HttpSource {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url,
            max_retry: 10,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override the retry budget and the base backoff delay.
    pub fn with_retry(mut self, max_retry: u32, retry_delay: Duration) -> Self {
        self.max_retry = max_retry;
        self.retry_delay = retry_delay;
        self
    }

    async fn back_off(&self, retry_count: &mut u32, reason: impl Display) -> Result<()> {
        *retry_count += 1;
        if *retry_count >= self.max_retry {
            bail!("Max retries exceeded: {}", reason);
        }
        warn!("{}, retry {}/{}", reason, retry_count, self.max_retry);
        tokio::time::sleep(self.retry_delay * *retry_count).await;
        Ok(())
    }

    /// Download the whole body and name it after the last URL segment.
    pub async fn fetch(&self) -> Result<SourceFile> {
        let resp = self.client.head(&self.url).send().await?;
        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        let headers = resp.headers();
        let ranged = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));
        let size: Option<u64> = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let mime_hint = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let bytes = match size {
            Some(size) if ranged => self.fetch_ranged(size).await?,
            _ => self.fetch_whole().await?,
        };

        Ok(SourceFile {
            name: file_name_from_url(&self.url),
            mime_hint,
            bytes,
        })
    }

    async fn fetch_whole(&self) -> Result<Vec<u8>> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn fetch_ranged(&self, size: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
        let mut retry_count = 0;

        while (buf.len() as u64) < size {
            let range = format!("bytes={}-{}", buf.len(), size - 1);

            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        bail!("HTTP request failed with status: {}", resp.status());
                    }
                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        self.back_off(&mut retry_count, format!("empty response for {}", range))
                            .await?;
                        continue;
                    }
                    let remaining = (size - buf.len() as u64) as usize;
                    buf.extend_from_slice(&bytes[..bytes.len().min(remaining)]);
                    debug!(url = %self.url, received = buf.len(), total = size, "range received");
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    self.back_off(&mut retry_count, format!("connection error: {}", e))
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(buf)
    }
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    match path.split_once('/') {
        Some((_, rest)) => rest
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string(),
        None => "download".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `Content-Length: 10` with byte ranges on HEAD and an empty 206
    /// on every GET. Returns the base URL and the GET counter.
    async fn empty_range_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gets = Arc::new(AtomicUsize::new(0));
        let counter = gets.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let response: &[u8] = if request.starts_with(b"HEAD") {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n"
                } else {
                    counter.fetch_add(1, Ordering::SeqCst);
                    b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-9/10\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/file.bin", addr), gets)
    }

    #[tokio::test]
    async fn empty_range_responses_exhaust_the_retries() {
        let (url, gets) = empty_range_server().await;
        let source = HttpSource::new(url)
            .unwrap()
            .with_retry(3, Duration::from_millis(1));
        let result = tokio::time::timeout(Duration::from_secs(10), source.fetch())
            .await
            .expect("fetch must give up on its own");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Max retries exceeded"));
        assert_eq!(gets.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn names_come_from_the_last_segment() {
        assert_eq!(file_name_from_url("https://host/a/b/photo.jpg"), "photo.jpg");
        assert_eq!(file_name_from_url("https://host/a/b/?x=1"), "b");
        assert_eq!(file_name_from_url("https://host"), "download");
        assert_eq!(file_name_from_url("http://host/report.pdf#page=2"), "report.pdf");
    }
}
