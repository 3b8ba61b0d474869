use super::{ImageSource, SourceResponse};
use crate::error::ImageError;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted reply for [`MockImageSource`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A complete response.
    Body {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    },
    /// A 200 response whose body never ends.
    Endless {
        content_type: String,
        chunk: Vec<u8>,
    },
    /// Transport failure before any response.
    TransportError(String),
    /// The request never completes.
    Hang,
}

impl MockResponse {
    pub fn image(content_type: &str, body: Vec<u8>) -> Self {
        Self::Body {
            status: 200,
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Body {
            status,
            content_type: Some("text/plain".to_string()),
            body: b"error".to_vec(),
        }
    }
}

/// Test source with per-URL scripted responses and an in-flight gauge.
#[derive(Clone)]
pub struct MockImageSource {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    default_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockImageSource {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            default_delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a response for `url`. Several responses are served in order and
    /// then cycle.
    pub fn with_response(self, url: &str, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(response);
        self
    }

    /// Delay applied to every request before it answers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay_for(self, url: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self
    }

    pub fn get_call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn get_total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of `get` calls observed running at the same time.
    pub fn get_peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let responses = self.responses.lock().unwrap();
        let scripted = responses.get(url)?;
        if scripted.is_empty() {
            return None;
        }
        Some(scripted[(count - 1) % scripted.len()].clone())
    }
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn get(&self, url: &str) -> Result<SourceResponse, ImageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.next_response(url) {
            None => Ok(SourceResponse {
                status: 404,
                content_type: None,
                content_length: None,
                body: stream::empty().boxed(),
            }),
            Some(MockResponse::Body {
                status,
                content_type,
                body,
            }) => Ok(SourceResponse {
                status,
                content_type,
                content_length: Some(body.len() as u64),
                body: stream::iter(vec![Ok(body)]).boxed(),
            }),
            Some(MockResponse::Endless {
                content_type,
                chunk,
            }) => Ok(SourceResponse {
                status: 200,
                content_type: Some(content_type),
                content_length: None,
                body: stream::repeat(chunk).map(Ok).boxed(),
            }),
            Some(MockResponse::TransportError(message)) => Err(ImageError::network(None, message)),
            Some(MockResponse::Hang) => futures::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_mock_source_cycles_responses() {
        let source = MockImageSource::new()
            .with_response("https://e.com/a.png", MockResponse::status(500))
            .with_response(
                "https://e.com/a.png",
                MockResponse::image("image/png", vec![1, 2, 3]),
            );

        let first = source.get("https://e.com/a.png").await.unwrap();
        assert_eq!(first.status, 500);

        let second = source.get("https://e.com/a.png").await.unwrap();
        assert_eq!(second.status, 200);
        assert_eq!(second.body.try_concat().await.unwrap(), vec![1, 2, 3]);

        let third = source.get("https://e.com/a.png").await.unwrap();
        assert_eq!(third.status, 500);

        assert_eq!(source.get_call_count("https://e.com/a.png"), 3);
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let source = MockImageSource::new();
        let response = source.get("https://e.com/missing.png").await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(source.get_total_calls(), 1);
    }

    #[tokio::test]
    async fn test_endless_body_keeps_producing() {
        let source = MockImageSource::new().with_response(
            "https://e.com/big.png",
            MockResponse::Endless {
                content_type: "image/png".to_string(),
                chunk: vec![0u8; 1024],
            },
        );

        let response = source.get("https://e.com/big.png").await.unwrap();
        let chunks: Vec<Vec<u8>> = response.body.take(10).try_collect().await.unwrap();
        assert_eq!(chunks.len(), 10);
    }

    #[tokio::test]
    async fn test_peak_in_flight_tracks_overlap() {
        let source = MockImageSource::new().with_delay(Duration::from_millis(20));

        let (a, b) = tokio::join!(source.get("https://e.com/a"), source.get("https://e.com/b"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(source.get_peak_in_flight(), 2);
    }
}
