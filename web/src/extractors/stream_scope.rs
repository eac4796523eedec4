use crate::Error;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use eventlog::{validate_scope, ErrorKind};
use service::config::STREAM_SCOPE_HEADER;

/// Tenant scope named by the `X-Stream-Scope` header, if any. Invalid scopes
/// are rejected before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamScope(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for StreamScope
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(STREAM_SCOPE_HEADER) else {
            return Ok(StreamScope(None));
        };

        let scope = value.to_str().map_err(|_| {
            eventlog::Error::new(ErrorKind::InvalidScope(
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ))
        })?;
        validate_scope(scope)?;

        Ok(StreamScope(Some(scope.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<StreamScope, Error> {
        let mut request = Request::builder().uri("/sse");
        if let Some(value) = header {
            request = request.header(STREAM_SCOPE_HEADER, value);
        }
        let (mut parts, _) = request.body(()).unwrap().into_parts();
        StreamScope::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_header_means_unscoped() {
        assert_eq!(extract(None).await.unwrap(), StreamScope(None));
    }

    #[tokio::test]
    async fn valid_scope_is_extracted() {
        assert_eq!(
            extract(Some("tenant-42")).await.unwrap(),
            StreamScope(Some("tenant-42".to_string()))
        );
    }

    #[tokio::test]
    async fn invalid_scope_is_rejected() {
        assert!(extract(Some("../etc")).await.is_err());
        assert!(extract(Some("")).await.is_err());
    }
}
