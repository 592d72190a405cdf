use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use url::Url;

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Placeholder shown when every capture attempt fails. Same asset the
/// deployment has always shipped, kept as a data URI.
const FALLBACK_IMAGE_DATA_URI: &str = "data:image/svg+xml;base64,PHN2ZyB3aWR0aD0iMTI4MCIgaGVpZ2h0PSI4MDAiIHhtbG5zPSJodHRwOi8vd3d3LnczLm9yZy8yMDAwL3N2ZyI+PHJlY3Qgd2lkdGg9IjEwMCUiIGhlaWdodD0iMTAwJSIgZmlsbD0iI2YzZjRmNiIvPjx0ZXh0IHg9IjUwJSIgeT0iNTAlIiBmb250LWZhbWlseT0iQXJpYWwiIGZvbnQtc2l6ZT0iMjQiIGZpbGw9IiM5Y2EzYWYiIHRleHQtYW5jaG9yPSJtaWRkbGUiIGRvbWluYW50LWJhc2VsaW5lPSJtaWRkbGUiPnNjcmVlbnNob3QgdW5hdmFpbGFibGU8L3RleHQ+PC9zdmc+";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Decode the placeholder image shipped with the binary.
pub fn fallback_image() -> CapturedImage {
    let (meta, payload) = FALLBACK_IMAGE_DATA_URI
        .split_once(',')
        .expect("fallback data uri has a payload");
    let content_type = meta
        .trim_start_matches("data:")
        .trim_end_matches(";base64")
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .expect("fallback data uri payload is valid base64");
    CapturedImage { bytes, content_type }
}

#[async_trait]
pub trait ScreenshotProvider: Send + Sync {
    async fn capture(&self, url: &Url) -> anyhow::Result<CapturedImage>;
}

/// Bounded retry for capture calls: a fixed number of attempts with a fixed
/// inter-attempt delay. Exhaustion is the caller's cue to degrade to the
/// placeholder, never a hard failure of the surrounding operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

pub async fn capture_with_retry(
    provider: &dyn ScreenshotProvider,
    url: &Url,
    policy: RetryPolicy,
) -> anyhow::Result<CapturedImage> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match provider.capture(url).await {
            Ok(image) => return Ok(image),
            Err(err) => {
                tracing::warn!(%url, attempt, attempts, error = %format!("{err:#}"), "capture attempt failed");
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("capture failed")))
}

/// Screenshot-as-a-service client: the endpoint renders the page in a
/// managed headless browser and answers with image bytes.
#[derive(Debug, Clone)]
pub struct HttpScreenshotProvider {
    client: reqwest::Client,
    endpoint: String,
    access_key: Option<String>,
}

impl HttpScreenshotProvider {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build screenshot http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            access_key,
        })
    }
}

#[async_trait]
impl ScreenshotProvider for HttpScreenshotProvider {
    async fn capture(&self, url: &Url) -> anyhow::Result<CapturedImage> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url.as_str())])
            .header(reqwest::header::ACCEPT, "image/*");
        if let Some(key) = &self.access_key {
            request = request.query(&[("access_key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("screenshot service answered {status}: {body}");
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        if !content_type.starts_with("image/") {
            anyhow::bail!("screenshot service answered non-image content type: {content_type}");
        }

        let bytes = read_bytes_limited(response, MAX_IMAGE_BYTES).await?;
        if bytes.is_empty() {
            anyhow::bail!("screenshot service answered an empty body");
        }

        Ok(CapturedImage {
            bytes,
            content_type,
        })
    }
}

async fn read_bytes_limited(mut resp: reqwest::Response, limit: usize) -> anyhow::Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await.context("read response chunk")? {
        if out.len() + chunk.len() > limit {
            anyhow::bail!("screenshot body exceeds {limit} bytes");
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Provider that never succeeds. Selected when no screenshot endpoint is
/// configured; every create degrades to the placeholder image.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScreenshotProvider;

#[async_trait]
impl ScreenshotProvider for NoopScreenshotProvider {
    async fn capture(&self, _url: &Url) -> anyhow::Result<CapturedImage> {
        anyhow::bail!("no screenshot provider configured")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, mpsc};
    use std::thread;

    use super::*;

    fn short_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn spawn_shot_server(
        fail_first: u32,
    ) -> (String, Arc<AtomicU32>, mpsc::Sender<()>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicU32::new(0));
        let hits_for_server = Arc::clone(&hits);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let hit = hits_for_server.fetch_add(1, Ordering::SeqCst) + 1;
                let response = if hit <= fail_first {
                    tiny_http::Response::from_string("boom").with_status_code(500)
                } else {
                    tiny_http::Response::from_string("jpegbytes").with_header(
                        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/jpeg"[..])
                            .unwrap(),
                    )
                };
                let _ = request.respond(response);
            }
        });

        (base_url, hits, shutdown_tx, handle)
    }

    #[test]
    fn fallback_image_decodes_to_svg() {
        let image = fallback_image();
        assert_eq!(image.content_type, "image/svg+xml");
        let text = String::from_utf8(image.bytes).unwrap();
        assert!(text.starts_with("<svg"));
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failures() {
        let (base_url, hits, shutdown_tx, handle) = spawn_shot_server(2);
        let provider =
            HttpScreenshotProvider::new(base_url, None, Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://example.com").unwrap();

        let image = capture_with_retry(&provider, &url, short_policy(3))
            .await
            .unwrap();
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.bytes, b"jpegbytes");
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let _ = shutdown_tx.send(());
        let _ = handle.join();
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let (base_url, hits, shutdown_tx, handle) = spawn_shot_server(u32::MAX);
        let provider =
            HttpScreenshotProvider::new(base_url, None, Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://example.com").unwrap();

        let err = capture_with_retry(&provider, &url, short_policy(3))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("500"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let _ = shutdown_tx.send(());
        let _ = handle.join();
    }

    #[tokio::test]
    async fn non_image_content_type_is_rejected() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            if let Ok(Some(request)) = server.recv_timeout(Duration::from_secs(5)) {
                let response = tiny_http::Response::from_string("<html>login</html>").with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]).unwrap(),
                );
                let _ = request.respond(response);
            }
        });

        let provider =
            HttpScreenshotProvider::new(base_url, None, Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://example.com").unwrap();
        let err = provider.capture(&url).await.unwrap_err();
        assert!(format!("{err:#}").contains("non-image"));

        let _ = handle.join();
    }
}
