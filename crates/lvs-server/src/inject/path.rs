//! Request path decoding.

use lvs_config::DotfilesPolicy;
use percent_encoding::percent_decode_str;

use crate::error::ServerError;

/// Decode a request path into its segments.
///
/// Empty and `.` segments are dropped. `..` anywhere is rejected with 403,
/// malformed percent escapes with 400.
pub(crate) fn decode_segments(raw: &str) -> Result<Vec<String>, ServerError> {
    check_escapes(raw)?;
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| ServerError::BadRequest(raw.to_owned()))?;
    if decoded.contains('\0') {
        return Err(ServerError::BadRequest(raw.to_owned()));
    }

    let mut segments = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(ServerError::Forbidden(raw.to_owned())),
            _ => segments.push(segment.to_owned()),
        }
    }
    Ok(segments)
}

/// Apply the dotfile policy to decoded segments.
pub(crate) fn check_dotfiles(
    segments: &[String],
    policy: DotfilesPolicy,
    raw: &str,
) -> Result<(), ServerError> {
    if !segments.iter().any(|s| s.starts_with('.')) {
        return Ok(());
    }
    match policy {
        DotfilesPolicy::Allow => Ok(()),
        DotfilesPolicy::Deny => Err(ServerError::Forbidden(raw.to_owned())),
        DotfilesPolicy::Ignore => Err(ServerError::NotFound(raw.to_owned())),
    }
}

/// Reject `%` not followed by two hex digits.
fn check_escapes(raw: &str) -> Result<(), ServerError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(ServerError::BadRequest(raw.to_owned()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decodes_segments() {
        assert_eq!(
            decode_segments("/a%20b/./c.html").unwrap(),
            vec!["a b".to_owned(), "c.html".to_owned()]
        );
        assert!(decode_segments("/").unwrap().is_empty());
    }

    #[test]
    fn test_traversal_is_forbidden() {
        for raw in ["/../etc/passwd", "/a/%2e%2e/b", "/a/..%5cb"] {
            let err = decode_segments(raw).unwrap_err();
            assert_eq!(err.status(), StatusCode::FORBIDDEN, "{raw}");
        }
    }

    #[test]
    fn test_malformed_encoding_is_bad_request() {
        for raw in ["/a%zz", "/a%2", "/%ff%fe"] {
            let err = decode_segments(raw).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{raw}");
        }
    }

    #[test]
    fn test_dotfile_policy() {
        let segments = vec![".env".to_owned()];
        assert!(check_dotfiles(&segments, DotfilesPolicy::Allow, "/.env").is_ok());
        assert_eq!(
            check_dotfiles(&segments, DotfilesPolicy::Deny, "/.env")
                .unwrap_err()
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            check_dotfiles(&segments, DotfilesPolicy::Ignore, "/.env")
                .unwrap_err()
                .status(),
            StatusCode::NOT_FOUND
        );
    }
}
