use crate::error::{Error, ErrorKind};

const MAX_SCOPE_LEN: usize = 64;

/// Checks that a tenant scope is safe to embed in a stream key:
/// 1 to 64 ASCII alphanumerics, `-` or `_`.
pub fn validate_scope(scope: &str) -> Result<(), Error> {
    let valid = !scope.is_empty()
        && scope.len() <= MAX_SCOPE_LEN
        && scope
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidScope(scope.to_string())))
    }
}

/// Returns the stream key holding events for `scope`, or the base stream when
/// the deployment is not multi-tenant.
pub fn scoped_stream(base: &str, scope: Option<&str>) -> Result<String, Error> {
    match scope {
        Some(scope) => {
            validate_scope(scope)?;
            Ok(format!("{base}:{scope}"))
        }
        None => Ok(base.to_string()),
    }
}
