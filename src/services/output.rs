//! Robust JSON extraction from model completions.
//!
//! Model output is supposed to be a bare JSON object, but in practice
//! arrives wrapped in markdown fences or surrounded by prose. Extraction
//! tries the strict parse first, then a fence strip, then a balanced-brace
//! scan for the first object in the text.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract the first JSON object from free-form model output.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    if let Some(inner) = strip_fences(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    scan_balanced(trimmed).and_then(|candidate| serde_json::from_str(candidate).ok())
}

/// Extract and deserialize into a typed record.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json(text)?;
    serde_json::from_value(value).ok()
}

fn strip_fences(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag on the opening fence line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.rfind("```")?;
    Some(&body[..end])
}

/// Find the first balanced `{...}` span, skipping braces inside strings.
fn scan_balanced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_object_parses() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_fenced_object_parses() {
        let text = "以下是分析结果：\n```json\n{\"design_rationale\": \"光线优先\"}\n```\n完毕。";
        let value = extract_json(text).unwrap();
        assert_eq!(value["design_rationale"], "光线优先");
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let text = "结论如下 {\"score\": 0.8, \"note\": \"含 { 花括号 } 的字符串\"} 供参考";
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 0.8);
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_scan() {
        let text = r#"x {"k": "a \" b { c"} y"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["k"], "a \" b { c");
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json("没有任何结构化内容").is_none());
    }

    #[test]
    fn test_typed_extraction() {
        #[derive(serde::Deserialize)]
        struct Out {
            score: f64,
        }
        let out: Out = extract_as("```\n{\"score\": 0.5}\n```").unwrap();
        assert!((out.score - 0.5).abs() < f64::EPSILON);
    }
}
