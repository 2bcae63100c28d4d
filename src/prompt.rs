//! `{{placeholder}}` substitution for prompt templates (spec §4.4, §8 law).

use std::collections::HashMap;

use serde_json::Value;

/// Substitute every `{{name}}` token found in `template`'s string values
/// (recursing into arrays/objects) with the matching entry from `args`,
/// coerced to a string. Tokens with no matching argument are left intact
/// (spec §4.4).
pub fn render(template: &Value, args: &HashMap<String, String>) -> Value {
    match template {
        Value::String(s) => Value::String(substitute_str(s, args)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, args)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), render(v, args))).collect())
        }
        other => other.clone(),
    }
}

fn substitute_str(template: &str, args: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated token: emit the rest verbatim.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let key = after_open[..end].trim();
                        match args.get(key) {
                            Some(value) => out.push_str(value),
                            None => out.push_str(&format!("{{{{{key}}}}}")),
                        }
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_single_placeholder() {
        let template = Value::String("Hello {{name}}".to_string());
        let rendered = render(&template, &args(&[("name", "Ada")]));
        assert_eq!(rendered, Value::String("Hello Ada".to_string()));
    }

    #[test]
    fn test_missing_argument_leaves_token_intact() {
        let template = Value::String("Hello {{name}}, you are {{age}}".to_string());
        let rendered = render(&template, &args(&[("name", "Ada")]));
        assert_eq!(
            rendered,
            Value::String("Hello Ada, you are {{age}}".to_string())
        );
    }

    #[test]
    fn test_recurses_into_nested_structures() {
        let template = serde_json::json!({
            "role": "user",
            "content": ["Hi {{name}}", { "text": "bye {{name}}" }],
        });
        let rendered = render(&template, &args(&[("name", "Grace")]));
        assert_eq!(
            rendered,
            serde_json::json!({
                "role": "user",
                "content": ["Hi Grace", { "text": "bye Grace" }],
            })
        );
    }

    #[test]
    fn test_round_trip_law() {
        // Substituting every {{k}} then un-substituting the same values
        // yields the original template, modulo the substitution (spec §8).
        let template = "Hello {{name}}, welcome to {{place}}".to_string();
        let a = args(&[("name", "Ada"), ("place", "Rust")]);
        let rendered = substitute_str(&template, &a);
        assert_eq!(rendered, "Hello Ada, welcome to Rust");

        let mut reversed = rendered;
        for (k, v) in &a {
            reversed = reversed.replace(v.as_str(), &format!("{{{{{k}}}}}"));
        }
        assert_eq!(reversed, template);
    }

    #[test]
    fn test_no_placeholders_is_unchanged() {
        let template = Value::String("plain text".to_string());
        assert_eq!(render(&template, &args(&[])), template);
    }
}
