use http::header::{self, HeaderMap, HeaderValue};

/// Returns whether the handler already applied its own content coding.
pub(crate) fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_ENCODING)
}

/// Adds `Accept-Encoding` to the `Vary` header unless an existing entry
/// (`accept-encoding` or `*`) already covers it.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vary_added_when_absent() {
        let mut headers = HeaderMap::new();
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get(header::VARY).unwrap(), "accept-encoding");
    }

    #[test]
    fn vary_appended_to_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("origin"));
        add_vary_accept_encoding(&mut headers);
        let values: Vec<_> = headers
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["origin", "accept-encoding"]);
    }

    #[test]
    fn vary_not_duplicated() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get_all(header::VARY).iter().count(), 1);
    }

    #[test]
    fn vary_star_left_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("*"));
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get(header::VARY).unwrap(), "*");
    }

    #[test]
    fn vary_combined_value_recognized() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::VARY,
            HeaderValue::from_static("origin, accept-encoding"),
        );
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get_all(header::VARY).iter().count(), 1);
    }

    #[test]
    fn content_encoding_probe() {
        let mut headers = HeaderMap::new();
        assert!(!has_content_encoding(&headers));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(has_content_encoding(&headers));
    }
}
