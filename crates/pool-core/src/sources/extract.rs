//! Shared candidate-extraction helpers for the user-defined source:
//! JSON dotted-path navigation, scheme filtering, and `ip[:port]`/
//! object synthesis into a `socks5://` candidate string.

use crate::config::ProxyExtractConfig;
use serde_json::Value;

/// Navigate a dotted path (`"data.list"`) through a JSON value.
pub fn navigate_json<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// A list element is skipped if it names a scheme other than socks5
/// (spec.md §4.2: "skip if its scheme is present and != socks5").
pub fn scheme_allowed(candidate: &str) -> bool {
    match candidate.find("://") {
        None => true,
        Some(idx) => &candidate[..idx] == "socks5",
    }
}

/// Build a `socks5://[user:pass@]ip:port` candidate from fields read
/// off a JSON object.
pub fn synthesize_from_json_object(obj: &Value, fields: &ProxyExtractConfig) -> Option<String> {
    let ip = navigate_json(obj, &fields.ip_field)?.as_str()?.to_string();
    let port = navigate_json(obj, &fields.port_field)?;
    let port = port.as_u64().or_else(|| port.as_str()?.parse().ok())?;

    let user = if fields.user_field.is_empty() {
        None
    } else {
        navigate_json(obj, &fields.user_field).and_then(|v| v.as_str())
    };
    let pass = if fields.pass_field.is_empty() {
        None
    } else {
        navigate_json(obj, &fields.pass_field).and_then(|v| v.as_str())
    };

    Some(match (user, pass) {
        (Some(u), Some(p)) if !u.is_empty() => format!("socks5://{u}:{p}@{ip}:{port}"),
        _ => format!("socks5://{ip}:{port}"),
    })
}

/// One element of a JSON proxy list: either a bare URL string, or an
/// object to synthesize a URL from.
pub fn candidate_from_json_element(elem: &Value, fields: &ProxyExtractConfig) -> Option<String> {
    match elem {
        Value::String(s) => scheme_allowed(s).then(|| s.clone()),
        Value::Object(_) => synthesize_from_json_object(elem, fields),
        _ => None,
    }
}

/// Split a text blob into candidate lines, skipping blanks, comments,
/// and disallowed schemes.
pub fn candidates_from_text(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| scheme_allowed(l))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn navigate_dotted_path() {
        let v = json!({"data": {"list": [1, 2, 3]}});
        assert_eq!(navigate_json(&v, "data.list"), Some(&json!([1, 2, 3])));
        assert_eq!(navigate_json(&v, "data.missing"), None);
    }

    #[test]
    fn scheme_filter() {
        assert!(scheme_allowed("1.2.3.4:1080"));
        assert!(scheme_allowed("socks5://1.2.3.4:1080"));
        assert!(!scheme_allowed("http://1.2.3.4:1080"));
    }

    #[test]
    fn synthesize_object_with_credentials() {
        let fields = ProxyExtractConfig {
            proxy_list_path: "data".into(),
            ip_field: "ip".into(),
            port_field: "port".into(),
            user_field: "user".into(),
            pass_field: "pass".into(),
        };
        let elem = json!({"ip": "9.9.9.9", "port": 1080, "user": "a", "pass": "b"});
        assert_eq!(
            synthesize_from_json_object(&elem, &fields),
            Some("socks5://a:b@9.9.9.9:1080".to_string())
        );
    }

    #[test]
    fn text_candidates_skip_blanks_and_comments() {
        let body = "1.2.3.4:1080\n\n# comment\nhttp://skip:1\n5.6.7.8:1080";
        assert_eq!(
            candidates_from_text(body),
            vec!["1.2.3.4:1080".to_string(), "5.6.7.8:1080".to_string()]
        );
    }
}
