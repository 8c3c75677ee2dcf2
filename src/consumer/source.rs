//! Remote event sources
//!
//! ## API Reference
//!
//! Request: `GET {url}?lastId={cursor}&limit={page_size}`
//! Response (200): `{"events": [{"id": 101, ...}, ...]}`
//!
//! Any status other than 200 is a failed fetch, as is a body without an
//! `events` array. Individual entries with a missing or non-numeric `id` are
//! dropped without failing the fetch.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::error::SourceError;
use super::types::Event;

/// Default page size hint sent as `limit`
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A fetchable append-only feed
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Unique name; used for cursors, request times and lock keys
    fn name(&self) -> &str;

    /// Events after `since_id`, in the order the source returned them
    ///
    /// May be empty and may contain ids `<= since_id`; filtering those is the
    /// caller's job.
    async fn fetch_events(&self, since_id: i64) -> Result<Vec<Event>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct HttpSourceOptions {
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for HttpSourceOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// JSON-over-HTTP event source
pub struct HttpEventSource {
    client: Client,
    name: String,
    url: String,
    options: HttpSourceOptions,
}

impl HttpEventSource {
    /// `client` is shared between sources; timeouts are applied per request
    pub fn new(
        client: Client,
        name: impl Into<String>,
        url: impl Into<String>,
        options: HttpSourceOptions,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            url: url.into(),
            options,
        }
    }

    fn transport_error(&self, source: reqwest::Error) -> SourceError {
        SourceError::Transport {
            url: self.url.clone(),
            source,
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_events(&self, since_id: i64) -> Result<Vec<Event>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("lastId", since_id.to_string()),
                ("limit", self.options.page_size.to_string()),
            ])
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let data: Value = serde_json::from_slice(&body).map_err(|e| SourceError::InvalidResponse {
            url: self.url.clone(),
            reason: format!("body is not JSON: {}", e),
        })?;

        parse_events(&self.name, &data).map_err(|reason| SourceError::InvalidResponse {
            url: self.url.clone(),
            reason,
        })
    }
}

/// Extract events from a decoded response body
///
/// Fails when `events` is missing or not an array. Entries that are not
/// objects or carry no numeric `id` are skipped. The whole entry object
/// becomes the event payload.
pub fn parse_events(source_name: &str, data: &Value) -> Result<Vec<Event>, String> {
    let entries = data
        .get("events")
        .ok_or_else(|| "missing `events` field".to_string())?
        .as_array()
        .ok_or_else(|| "`events` is not an array".to_string())?;

    let events = entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let id = object.get("id").and_then(numeric_id)?;
            Some(Event::new(id, source_name, object.clone()))
        })
        .collect::<Vec<_>>();

    let skipped = entries.len() - events.len();
    if skipped > 0 {
        log::debug!("Dropped {} malformed entries from {}", skipped, source_name);
    }

    Ok(events)
}

/// Integer, finite float (truncated toward zero), or a string holding either
fn numeric_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_id)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_id))
        }
        _ => None,
    }
}

fn float_id(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ids(events: &[Event]) -> Vec<i64> {
        events.iter().map(|e| e.id()).collect()
    }

    #[test]
    fn test_parse_keeps_source_order() {
        let body = json!({"events": [{"id": 101, "a": 1}, {"id": 99}, {"id": 102}]});
        let events = parse_events("A", &body).unwrap();

        assert_eq!(ids(&events), vec![101, 99, 102]);
        assert_eq!(events[0].source_name(), "A");
        assert_eq!(events[0].payload()["a"], 1);
    }

    #[test]
    fn test_parse_drops_malformed_entries() {
        let body = json!({"events": [
            {"id": 1},
            {"payload": "no id"},
            {"id": "abc"},
            {"id": null},
            {"id": true},
            "not an object",
            {"id": "7"},
            {"id": 8.9},
            {"id": " 10 "},
        ]});
        let events = parse_events("A", &body).unwrap();
        assert_eq!(ids(&events), vec![1, 7, 8, 10]);
    }

    #[test]
    fn test_parse_rejects_missing_or_wrong_typed_list() {
        assert!(parse_events("A", &json!({})).is_err());
        assert!(parse_events("A", &json!({"events": {"id": 1}})).is_err());
        assert!(parse_events("A", &json!({"events": null})).is_err());
        assert!(parse_events("A", &json!([{"id": 1}])).is_err());
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_events("A", &json!({"events": []})).unwrap().is_empty());
    }

    /// Serve one canned HTTP response, returning the request line it saw
    async fn serve_once(status_line: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_fetch_sends_cursor_and_limit() {
        let (url, server) = serve_once("200 OK", json!({"events": [{"id": 6}]}).to_string()).await;
        let source = HttpEventSource::new(Client::new(), "A", url, HttpSourceOptions::default());

        let events = source.fetch_events(5).await.unwrap();
        assert_eq!(ids(&events), vec![6]);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /events?"));
        assert!(request_line.contains("lastId=5"));
        assert!(request_line.contains("limit=1000"));
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_status_error() {
        let (url, _server) = serve_once("500 Internal Server Error", "{}".to_string()).await;
        let source = HttpEventSource::new(Client::new(), "A", url, HttpSourceOptions::default());

        let err = source.fetch_events(0).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_fetch_invalid_body_is_format_error() {
        let (url, _server) = serve_once("200 OK", json!({"items": []}).to_string()).await;
        let source = HttpEventSource::new(Client::new(), "A", url, HttpSourceOptions::default());

        let err = source.fetch_events(0).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));

        let (url, _server) = serve_once("200 OK", "<html>".to_string()).await;
        let source = HttpEventSource::new(Client::new(), "A", url, HttpSourceOptions::default());
        let err = source.fetch_events(0).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());
        // Accept and never answer
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let options = HttpSourceOptions {
            timeout: Duration::from_millis(200),
            ..HttpSourceOptions::default()
        };
        let source = HttpEventSource::new(Client::new(), "A", url, options);

        let err = source.fetch_events(0).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport { .. }));
    }
}
