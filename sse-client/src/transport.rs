use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use log::*;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};

use crate::error::{Error, ErrorKind};

/// Raw body chunks, split wherever the network split them.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, Error>>;

/// Header naming the tenant scope of the stream.
pub const STREAM_SCOPE_HEADER: &str = "X-Stream-Scope";
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Source of byte chunks for the parser. One call opens one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, last_event_id: Option<&str>) -> Result<ByteStream, Error>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    scope: Option<String>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            scope: None,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, last_event_id: Option<&str>) -> Result<ByteStream, Error> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID_HEADER, id);
        }
        if let Some(scope) = &self.scope {
            request = request.header(STREAM_SCOPE_HEADER, scope);
        }

        debug!("Opening event stream {}", self.url);
        let response = request.send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            return Err(Error::new(ErrorKind::ContentType(content_type.to_string())));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from))
            .boxed())
    }
}
