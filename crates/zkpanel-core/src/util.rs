use serde_json::Value;

/// Parse a boolean-like environment flag.
/// Accepts common values such as 1/0, true/false, yes/no, on/off (case-insensitive).
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read an environment variable and parse it as a boolean flag using [`parse_bool_flag`].
pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_bool_flag(&raw))
}

pub fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
}

/// Plain text form of an attribute value: strings without quotes, scalars as
/// their JSON literal, compound values as compact JSON.
pub fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric view of an attribute value. Numeric strings count; NaN and
/// infinities do not.
pub fn attribute_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_bool_flag_recognizes_common_values() {
        assert_eq!(parse_bool_flag("true"), Some(true));
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
        assert_eq!(parse_bool_flag(""), None);
    }

    #[test]
    fn attribute_text_strips_string_quotes() {
        assert_eq!(attribute_text(&json!("Doctor")), "Doctor");
        assert_eq!(attribute_text(&json!(30)), "30");
        assert_eq!(attribute_text(&json!(true)), "true");
        assert_eq!(attribute_text(&json!(["a", 1])), "[\"a\",1]");
    }

    #[test]
    fn attribute_number_accepts_numeric_strings_only() {
        assert_eq!(attribute_number(&json!(" 42 ")), Some(42.0));
        assert_eq!(attribute_number(&json!(1.5)), Some(1.5));
        assert_eq!(attribute_number(&json!("NaN")), None);
        assert_eq!(attribute_number(&json!("inf")), None);
        assert_eq!(attribute_number(&json!("forty")), None);
        assert_eq!(attribute_number(&json!(false)), None);
    }
}
