//! Template placeholder parsing and rendering.
//!
//! Placeholders use `{{ name }}`. Whitespace inside the braces is ignored and
//! names are limited to ASCII letters, digits, `_`, `-` and `.`.

use crate::error::WagateError;
use std::collections::HashMap;

/// Maximum length of a template name.
pub const MAX_NAME_LEN: usize = 64;

/// A placeholder occurrence: byte range in the body plus the variable name.
struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn scan(body: &str) -> Vec<Placeholder<'_>> {
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(open) = body[pos..].find("{{") {
        let start = pos + open;
        let Some(close) = body[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let name = body[start + 2..end - 2].trim();

        if !name.is_empty() && name.chars().all(is_name_char) {
            found.push(Placeholder { start, end, name });
            pos = end;
        } else {
            // Not a placeholder; keep scanning after this opening brace.
            pos = start + 2;
        }
    }

    found
}

/// Distinct placeholder names, in order of first appearance.
pub fn placeholders(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in scan(body) {
        if !names.iter().any(|n| n == p.name) {
            names.push(p.name.to_string());
        }
    }
    names
}

/// Substitute `{{ key }}` with `vars[key]`. Unknown keys are left as written.
pub fn render(body: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for p in scan(body) {
        if let Some(value) = vars.get(p.name) {
            out.push_str(&body[last..p.start]);
            out.push_str(value);
            last = p.end;
        }
    }
    out.push_str(&body[last..]);
    out
}

/// Check a template name and body before it is stored.
pub fn validate(name: &str, body: &str) -> Result<(), WagateError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WagateError::Validation("template name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(WagateError::Validation(format!(
            "template name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if body.trim().is_empty() {
        return Err(WagateError::Validation("template body must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_known_keys() {
        let out = render(
            "Hi {{name}}, your order {{ order_id }} ships today.",
            &vars(&[("name", "Ana"), ("order_id", "A-17")]),
        );
        assert_eq!(out, "Hi Ana, your order A-17 ships today.");
    }

    #[test]
    fn test_render_keeps_unknown_keys() {
        let out = render("Hi {{name}} from {{city}}", &vars(&[("name", "Ana")]));
        assert_eq!(out, "Hi Ana from {{city}}");
    }

    #[test]
    fn test_render_repeated_key() {
        let out = render("{{x}}-{{x}}", &vars(&[("x", "1")]));
        assert_eq!(out, "1-1");
    }

    #[test]
    fn test_render_ignores_malformed_braces() {
        let body = "json {{ not a var }} and {{unclosed";
        assert_eq!(render(body, &vars(&[("not", "x")])), body);
    }

    #[test]
    fn test_placeholders_distinct_in_order() {
        let names = placeholders("{{b}} {{a}} {{ b }} {{c.d}}");
        assert_eq!(names, vec!["b", "a", "c.d"]);
    }

    #[test]
    fn test_validate() {
        assert!(validate("welcome", "Hello").is_ok());
        assert!(validate(" ", "Hello").is_err());
        assert!(validate("welcome", "  ").is_err());
        assert!(validate(&"n".repeat(65), "Hello").is_err());
    }
}
