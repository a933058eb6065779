//! `{key}` naming templates.
//!
//! Templates are literal text with `{field}` placeholders, e.g.
//! `"{series} - S{season}E{episode} - {title}"`. Substitution is plain
//! string replacement: unknown placeholders are left untouched so a typo in
//! a user template shows up verbatim in the output instead of erroring.

use std::collections::BTreeMap;

/// Replace every `{key}` occurrence in `template` with the mapped value.
pub fn fill(template: &str, fields: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in fields {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_basic_substitution() {
        let f = fields(&[("series", "Show"), ("title", "Pilot")]);
        assert_eq!(fill("{series} - {title}", &f), "Show - Pilot");
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        let f = fields(&[("series", "Foo")]);
        assert_eq!(fill("{series} - {bogus}", &f), "Foo - {bogus}");
    }

    #[test]
    fn test_repeated_placeholder() {
        let f = fields(&[("x", "1")]);
        assert_eq!(fill("{x}{x}{x}", &f), "111");
    }

    #[test]
    fn test_empty_template() {
        assert_eq!(fill("", &fields(&[("a", "b")])), "");
    }
}
