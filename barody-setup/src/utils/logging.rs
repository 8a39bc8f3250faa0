// Logging utilities
//
// Log messages carry `[PHASE: x] [STEP: y]` tags. The fern formatters in `lib.rs` lift them into
// fields of the JSON-lines file and into a fixed position in the text file.

use log::Level;
use serde_json::{Map, Value};
use url::Url;

/// Keep the first and last four characters of a secret-ish value (token hashes, user names).
pub fn mask_sensitive(input: &str) -> String {
    const VISIBLE: usize = 4;
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= VISIBLE * 2 {
        return "***".to_string();
    }
    let head: String = chars[..VISIBLE].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Database URL safe for a log line. URLs without credentials pass through unchanged;
/// anything unparseable is hidden entirely.
pub fn mask_database_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let Ok(mut url) = Url::parse(raw) else {
        return "***".to_string();
    };
    if url.username().is_empty() && url.password().is_none() {
        return raw.to_string();
    }

    let user = mask_sensitive(url.username());
    if url.set_username(&user).is_err() || url.set_password(Some("***")).is_err() {
        return "***".to_string();
    }
    url.to_string()
}

/// Remove the first `[NAME: value]` tag from `message`, returning its trimmed value.
fn take_tag(message: &mut String, name: &str) -> Option<String> {
    let open = format!("[{}:", name);
    let start = message.find(&open)?;
    let len = message[start..].find(']')?;
    let value = message[start + open.len()..start + len].trim().to_string();

    let rest = format!("{} {}", &message[..start], &message[start + len + 1..]);
    *message = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(value)
}

/// Split a message into `(phase, step, remaining text)`.
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let mut text = message.to_string();
    let phase = take_tag(&mut text, "PHASE");
    let step = take_tag(&mut text, "STEP");
    (phase, step, text)
}

/// One JSON object per line; `phase`/`step` appear only when tagged.
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut entry = Map::new();
    entry.insert("timestamp".into(), Value::from(timestamp));
    entry.insert("level".into(), Value::from(level.as_str()));
    entry.insert("target".into(), Value::from(target));
    entry.insert("message".into(), Value::from(message));
    if let Some(phase) = phase {
        entry.insert("phase".into(), Value::from(phase));
    }
    if let Some(step) = step {
        entry.insert("step".into(), Value::from(step));
    }
    Value::Object(entry).to_string()
}

/// `[ts] [LEVEL] [PHASE: p] [STEP: s] [target] message`
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut parts = vec![format!("[{}]", timestamp), format!("[{}]", level)];
    parts.extend(phase.map(|p| format!("[PHASE: {}]", p)));
    parts.extend(step.map(|s| format!("[STEP: {}]", s)));
    parts.push(format!("[{}]", target));
    parts.push(message.to_string());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secrets_are_hidden_and_long_ones_trimmed() {
        assert_eq!(mask_sensitive("abc"), "***");
        assert_eq!(mask_sensitive("12345678"), "***");
        assert_eq!(mask_sensitive("3f2a9c0d51b7e4aa"), "3f2a...e4aa");
        assert_eq!(mask_sensitive("ääääbbbbccccdddd"), "ääää...dddd");
    }

    #[test]
    fn database_url_credentials_are_hidden() {
        let masked = mask_database_url("postgres://barody:hunter2hunter2@db:5432/barody");
        assert!(masked.contains(":***@"), "{masked}");
        assert!(!masked.contains("hunter2"), "{masked}");
        assert!(masked.contains("db:5432/barody"), "{masked}");

        assert_eq!(
            mask_database_url("sqlite://barody.db?mode=rwc"),
            "sqlite://barody.db?mode=rwc"
        );
        assert_eq!(mask_database_url("  "), "");
        assert_eq!(mask_database_url("not a url"), "***");
    }

    #[test]
    fn tags_are_lifted_out_of_the_message() {
        let (phase, step, msg) =
            parse_log_metadata("[PHASE: setup] [STEP: consume_token] Setup token consumed");
        assert_eq!(phase.as_deref(), Some("setup"));
        assert_eq!(step.as_deref(), Some("consume_token"));
        assert_eq!(msg, "Setup token consumed");

        let (phase, step, msg) = parse_log_metadata("plain message");
        assert!(phase.is_none() && step.is_none());
        assert_eq!(msg, "plain message");
    }

    #[test]
    fn json_line_omits_missing_tags() {
        let line = format_json_log(
            "2026-01-01T00:00:00Z",
            Level::Info,
            "barody_setup",
            "hello",
            Some("setup"),
            None,
        );
        let v: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(v["phase"], "setup");
        assert_eq!(v["level"], "INFO");
        assert!(v.get("step").is_none());
    }

    #[test]
    fn text_line_layout() {
        let line = format_human_readable_log(
            "2026-01-01 00:00:00.000",
            Level::Warn,
            "barody_setup::api",
            "redirecting",
            Some("middleware"),
            Some("gate"),
        );
        assert_eq!(
            line,
            "[2026-01-01 00:00:00.000] [WARN] [PHASE: middleware] [STEP: gate] [barody_setup::api] redirecting"
        );
    }
}
