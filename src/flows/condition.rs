//! Rule mini-language for condition nodes.
//!
//! Grammar: `IDENT OP VALUE` with OP one of `==` `!=` `>=` `<=` `>` `<`
//! `contains`. Quotes around VALUE are optional and stripped. This is
//! deliberately not a general expression evaluator -- rules stay small,
//! safe and auditable in the visual editor.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Contains,
}

// Longest operators first so `>=` is never split as `>` + `=`.
const OPS: &[(&str, Op)] = &[
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (" contains ", Op::Contains),
    (">", Op::Gt),
    ("<", Op::Lt),
];

fn parse(rule: &str) -> Option<(&str, Op, &str)> {
    for (token, op) in OPS {
        if let Some(idx) = rule.find(token) {
            let ident = rule[..idx].trim();
            let value = rule[idx + token.len()..].trim();
            if ident.is_empty() {
                return None;
            }
            return Some((ident, *op, value));
        }
    }
    None
}

fn strip_quotes(value: &str) -> &str {
    let v = value.trim();
    for quote in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(quote) && v.ends_with(quote) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

/// Evaluate a rule against the context variables. A missing variable reads
/// as empty string; malformed rules and non-numeric comparisons evaluate
/// to false. Never panics.
pub fn evaluate(rule: &str, variables: &HashMap<String, String>) -> bool {
    let Some((ident, op, raw_value)) = parse(rule) else {
        tracing::debug!(rule, "unparseable condition rule");
        return false;
    };
    let expected = strip_quotes(raw_value);
    let actual = variables.get(ident).map(String::as_str).unwrap_or("");

    match op {
        Op::Eq => actual.to_lowercase() == expected.to_lowercase(),
        Op::Ne => actual.to_lowercase() != expected.to_lowercase(),
        Op::Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
        Op::Gt | Op::Lt | Op::Ge | Op::Le => {
            let (Ok(a), Ok(b)) = (actual.trim().parse::<f64>(), expected.parse::<f64>()) else {
                return false;
            };
            match op {
                Op::Gt => a > b,
                Op::Lt => a < b,
                Op::Ge => a >= b,
                Op::Le => a <= b,
                _ => unreachable!(),
            }
        }
    }
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
    fn equality_is_case_insensitive() {
        let v = vars(&[("plan", "Teste Grátis")]);
        assert!(evaluate("plan == teste grátis", &v));
        assert!(evaluate("plan == \"teste grátis\"", &v));
    }

    #[test]
    fn inequality() {
        let v = vars(&[("plan", "pro")]);
        assert!(evaluate("plan != free", &v));
        assert!(!evaluate("plan != PRO", &v));
    }

    #[test]
    fn numeric_comparisons() {
        let v = vars(&[("age", "17")]);
        assert!(!evaluate("age > 18", &v));
        assert!(evaluate("age < 18", &v));
        assert!(evaluate("age >= 17", &v));
        assert!(evaluate("age <= 17", &v));
    }

    #[test]
    fn numeric_against_non_number_is_false() {
        let v = vars(&[("age", "dezessete")]);
        assert!(!evaluate("age > 18", &v));
        assert!(!evaluate("age < 18", &v));
    }

    #[test]
    fn contains_operator() {
        let v = vars(&[("message", "Quero Suporte agora")]);
        assert!(evaluate("message contains suporte", &v));
        assert!(!evaluate("message contains vendas", &v));
    }

    #[test]
    fn missing_variable_reads_empty() {
        let v = vars(&[]);
        assert!(evaluate("nome == ''", &v));
        assert!(!evaluate("nome == algo", &v));
    }

    #[test]
    fn malformed_rule_is_false() {
        let v = vars(&[("x", "1")]);
        assert!(!evaluate("nonsense", &v));
        assert!(!evaluate("", &v));
        assert!(!evaluate("== valor", &v));
    }
}
