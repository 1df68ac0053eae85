use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

// Placeholder paths are one or two dotted segments: {{name}}, {{contact.phone}}.
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*\}\}")
            .expect("placeholder regex")
    })
}

/// Replace every `{{path}}` placeholder with the matching context variable.
/// An unresolved path leaves the placeholder verbatim; this never fails.
pub fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
