//! Gateway request normalization.
//!
//! USSD aggregators disagree on field spellings: one sends `sessionId`,
//! another `session_id`, a third stuffs the dial string into `userData`.
//! Each logical field therefore resolves through a fixed, ordered alias
//! table against the merged request body.  Resolution never fails; absent
//! fields come back as `None` and are validated by the handler.

use serde_json::Value;

/// Merged key/value request body.  Form entries are inserted first and JSON
/// entries second, so JSON wins on key collisions.
pub type MergedBody = serde_json::Map<String, Value>;

pub const SESSION_ID_ALIASES: &[&str] =
    &["sessionId", "session_id", "sessionID", "sessionid", "session"];

pub const SERVICE_CODE_ALIASES: &[&str] = &[
    "serviceCode",
    "service_code",
    "servicecode",
    "service",
    "ussd",
    "userData",
    "user_data",
    "userdata",
];

pub const PHONE_ALIASES: &[&str] =
    &["phoneNumber", "phone_number", "msisdn", "msisdnNumber", "phone"];

pub const TEXT_ALIASES: &[&str] = &[
    "text",
    "message",
    "input",
    "ussd_string",
    "userData",
    "userdata",
    "userInput",
];

pub const NEW_SESSION_ALIASES: &[&str] = &["newSession", "new_session", "newsession", "isNew"];

/// Canonical view of one gateway request.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRequest {
    pub session_id: Option<String>,
    pub service_code: Option<String>,
    pub phone_number: Option<String>,
    pub text: String,
    pub new_session: bool,
}

/// Resolve a field through its alias table: for each alias, an exact key
/// match is tried before a case-insensitive scan, and the first alias with a
/// non-null value wins.
pub fn pick<'a>(merged: &'a MergedBody, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        if let Some(v) = merged.get(*alias) {
            if !v.is_null() {
                return Some(v);
            }
        }
        for (key, v) in merged {
            if key.eq_ignore_ascii_case(alias) && !v.is_null() {
                return Some(v);
            }
        }
    }
    None
}

/// Like [`pick`] but renders scalar values to a string.  Arrays and objects
/// do not resolve.
pub fn pick_string(merged: &MergedBody, aliases: &[&str]) -> Option<String> {
    match pick(merged, aliases)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fold fullwidth `＃`/`＊` to their ASCII forms and trim whitespace.
pub fn normalize_text(s: &str) -> String {
    s.replace('\u{FF03}', "#").replace('\u{FF0A}', "*").trim().to_string()
}

fn coerce_new_session(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        Some(Value::Number(n)) => n.to_string() == "1",
        _ => false,
    }
}

/// Extract and canonicalize the gateway fields from a merged request body.
pub fn normalize(merged: &MergedBody) -> NormalizedRequest {
    let session_id = pick_string(merged, SESSION_ID_ALIASES);
    let phone_number = pick_string(merged, PHONE_ALIASES);
    let new_session = coerce_new_session(pick(merged, NEW_SESSION_ALIASES));

    let mut service_code = pick_string(merged, SERVICE_CODE_ALIASES)
        .map(|s| normalize_text(&s))
        .filter(|s| !s.is_empty());
    let mut text = normalize_text(&pick_string(merged, TEXT_ALIASES).unwrap_or_default());

    // A gateway that only populates `text` with the dial string itself
    // (e.g. "*384#") is really telling us the service code.
    if service_code.is_none() && text.starts_with('*') && text.contains('#') {
        service_code = Some(text.clone());
        if new_session {
            text.clear();
        }
    }

    NormalizedRequest {
        session_id,
        service_code,
        phone_number,
        text,
        new_session,
    }
}

/// Whether `text` looks like the first leg of a dial rather than a menu
/// selection.  Empty text always counts; with a known service code the text
/// may match it with or without the trailing `#`; any `*`/`#` content is
/// treated as a dial string.
pub fn is_initial_dial(text: &str, service_code: Option<&str>) -> bool {
    if text.is_empty() {
        return true;
    }
    let t = text.trim();
    match service_code {
        None => t.contains('*') || t.contains('#'),
        Some(sc) => {
            let sc = sc.trim();
            t == sc
                || (sc.ends_with('#') && t == sc.trim_end_matches('#'))
                || t.contains('*')
                || t.contains('#')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(pairs: &[(&str, Value)]) -> MergedBody {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn resolves_first_matching_alias() {
        let merged = body(&[
            ("session", json!("fallback")),
            ("session_id", json!("winner")),
        ]);
        let norm = normalize(&merged);
        assert_eq!(norm.session_id.as_deref(), Some("winner"));
    }

    #[test]
    fn falls_back_to_case_insensitive_match() {
        let merged = body(&[("SessionID", json!("s-42"))]);
        let norm = normalize(&merged);
        assert_eq!(norm.session_id.as_deref(), Some("s-42"));
    }

    #[test]
    fn null_values_do_not_resolve() {
        let merged = body(&[("sessionId", json!(null)), ("session", json!("s-9"))]);
        let norm = normalize(&merged);
        assert_eq!(norm.session_id.as_deref(), Some("s-9"));
    }

    #[test]
    fn numeric_session_ids_render_as_strings() {
        let merged = body(&[("sessionId", json!(12345))]);
        let norm = normalize(&merged);
        assert_eq!(norm.session_id.as_deref(), Some("12345"));
    }

    #[test]
    fn new_session_coercion_accepts_string_forms() {
        for v in [json!(true), json!("true"), json!("TRUE"), json!("1"), json!("yes"), json!(1)] {
            let merged = body(&[("newSession", v)]);
            assert!(normalize(&merged).new_session);
        }
        for v in [json!(false), json!("false"), json!("0"), json!("no"), json!("maybe"), json!(null)] {
            let merged = body(&[("newSession", v)]);
            assert!(!normalize(&merged).new_session);
        }
    }

    #[test]
    fn fullwidth_symbols_fold_to_ascii() {
        let merged = body(&[("text", json!("  ＊384＃  "))]);
        let norm = normalize(&merged);
        assert_eq!(norm.service_code.as_deref(), Some("*384#"));
    }

    #[test]
    fn dial_string_in_text_becomes_service_code() {
        let merged = body(&[
            ("sessionId", json!("s1")),
            ("text", json!("*384#")),
            ("newSession", json!("true")),
        ]);
        let norm = normalize(&merged);
        assert_eq!(norm.service_code.as_deref(), Some("*384#"));
        assert_eq!(norm.text, "");
    }

    #[test]
    fn dial_string_kept_as_text_when_not_new_session() {
        let merged = body(&[("text", json!("*384#"))]);
        let norm = normalize(&merged);
        assert_eq!(norm.service_code.as_deref(), Some("*384#"));
        assert_eq!(norm.text, "*384#");
    }

    #[test]
    fn missing_fields_resolve_to_none() {
        let norm = normalize(&MergedBody::new());
        assert!(norm.session_id.is_none());
        assert!(norm.phone_number.is_none());
        assert!(norm.service_code.is_none());
        assert_eq!(norm.text, "");
        assert!(!norm.new_session);
    }

    #[test]
    fn initial_dial_detection() {
        assert!(is_initial_dial("", None));
        assert!(is_initial_dial("", Some("*384#")));
        assert!(is_initial_dial("*384#", Some("*384#")));
        assert!(is_initial_dial("*384", Some("*384#")));
        assert!(is_initial_dial("*999#", Some("*384#")));
        assert!(is_initial_dial("*123*4#", None));
        assert!(!is_initial_dial("1", Some("*384#")));
        assert!(!is_initial_dial("1", None));
        assert!(!is_initial_dial("Lagos", None));
    }
}
