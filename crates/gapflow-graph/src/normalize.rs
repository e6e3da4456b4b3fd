//! Path normalization and route matching

/// Canonical form of a route or file path: drive letter stripped,
/// backslashes turned into `/`, lowercased, leading and trailing slashes
/// trimmed.
///
/// ```
/// use gapflow_graph::normalize_path;
/// assert_eq!(normalize_path("C:\\API\\Users\\"), "api/users");
/// assert_eq!(normalize_path("/Users/:ID/"), "users/:id");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let without_drive = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    };
    without_drive
        .replace('\\', "/")
        .to_lowercase()
        .trim_matches('/')
        .to_string()
}

/// Drop a `?query` suffix (and any `#fragment`)
#[must_use]
pub fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn is_wildcard(segment: &str) -> bool {
    segment.starts_with(':') || segment.starts_with('{')
}

/// HTTP method equality, ignoring case
#[inline]
#[must_use]
pub fn methods_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Compare two normalized paths segment by segment. A segment starting with
/// `:` or `{` on either side matches anything; segment counts must be equal.
#[must_use]
pub fn paths_match(call_path: &str, endpoint_path: &str) -> bool {
    let call = strip_query(call_path).trim_matches('/');
    let endpoint = strip_query(endpoint_path).trim_matches('/');

    let call_segments: Vec<&str> = call.split('/').collect();
    let endpoint_segments: Vec<&str> = endpoint.split('/').collect();
    if call_segments.len() != endpoint_segments.len() {
        return false;
    }
    call_segments
        .iter()
        .zip(&endpoint_segments)
        .all(|(c, e)| is_wildcard(c) || is_wildcard(e) || c == e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_path("/users"), "users");
        assert_eq!(normalize_path("D:/src/App.ts"), "src/app.ts");
        assert_eq!(normalize_path("src\\Routes\\users.ts"), "src/routes/users.ts");
        assert_eq!(normalize_path("///"), "");
        // ':' in the second position only counts as a drive after a letter
        assert_eq!(normalize_path("/:id"), ":id");
    }

    #[test]
    fn normalization_is_idempotent() {
        for p in ["C:\\A\\b", "/x/Y/", "users/{id}"] {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once);
        }
    }

    #[test]
    fn wildcards_match_either_side() {
        assert!(paths_match("users/:id", "users/{id}"));
        assert!(paths_match("users/42", "users/:id"));
        assert!(paths_match("users/{userid}", "users/7"));
        assert!(!paths_match("users/42/posts", "users/:id"));
        assert!(!paths_match("accounts/42", "users/:id"));
    }

    #[test]
    fn query_strings_are_ignored() {
        assert!(paths_match("users?page=2", "users"));
        assert!(paths_match("users/:id?expand=true", "users/{id}"));
        assert!(!paths_match("users?x=1", "users/list"));
    }

    #[test]
    fn empty_paths() {
        assert!(paths_match("", ""));
        assert!(!paths_match("", "users"));
    }

    #[test]
    fn methods_ignore_case() {
        assert!(methods_match("get", "GET"));
        assert!(!methods_match("GET", "POST"));
    }
}
