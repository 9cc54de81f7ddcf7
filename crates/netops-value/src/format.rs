//! Canonical text output.
//!
//! Fields are sorted by label, one per line, tab-indented. The top-level
//! struct is printed without braces. Floats always carry a `.` or an
//! exponent so they read back as floats.

use crate::error::ValueResult;
use crate::value::{Struct, Value};

/// Formatting options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Resolve defaults, omit definitions and optional fields, and reject
    /// non-concrete values.
    pub finalize: bool,
}

impl FormatOptions {
    pub fn final_() -> Self {
        Self { finalize: true }
    }
}

/// Format `value` canonically.
pub fn format(value: &Value, opts: FormatOptions) -> ValueResult<String> {
    let finalized;
    let value = if opts.finalize {
        finalized = value.finalize()?;
        &finalized
    } else {
        value
    };
    let mut out = String::new();
    match value {
        Value::Struct(s) => write_fields(&mut out, s, 0),
        other => {
            write_value(&mut out, other, 0);
            out.push('\n');
        }
    }
    Ok(out)
}

fn write_fields(out: &mut String, s: &Struct, indent: usize) {
    for (label, field) in s.iter() {
        push_indent(out, indent);
        out.push_str(&format_label(label));
        if field.optional {
            out.push('?');
        }
        out.push_str(": ");
        write_value(out, &field.value, indent);
        out.push('\n');
    }
}

fn write_value(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::Top => out.push('_'),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::String(s) => out.push_str(&quote(s)),
        Value::Type(t) => out.push_str(t.name()),
        Value::OpenList(elem) => {
            out.push_str("[...");
            write_value(out, elem, indent);
            out.push(']');
        }
        Value::List(items) if items.is_empty() => out.push_str("[]"),
        Value::List(items) if items.iter().all(is_inline) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, indent);
            }
            out.push(']');
        }
        Value::List(items) => {
            out.push_str("[\n");
            for item in items {
                push_indent(out, indent + 1);
                write_value(out, item, indent + 1);
                out.push_str(",\n");
            }
            push_indent(out, indent);
            out.push(']');
        }
        Value::Struct(s) if s.is_empty() => out.push_str("{}"),
        Value::Struct(s) => {
            out.push_str("{\n");
            write_fields(out, s, indent + 1);
            push_indent(out, indent);
            out.push('}');
        }
        Value::Disjunction(alts) => {
            for (i, alt) in alts.iter().enumerate() {
                if i > 0 {
                    out.push_str(" | ");
                }
                if alt.default {
                    out.push('*');
                }
                let nested = matches!(alt.value, Value::Disjunction(_));
                if nested {
                    out.push('(');
                }
                write_value(out, &alt.value, indent);
                if nested {
                    out.push(')');
                }
            }
        }
    }
}

fn is_inline(v: &Value) -> bool {
    match v {
        Value::Struct(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        _ => true,
    }
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push('\t');
    }
}

/// Float text that always reads back as a float.
pub fn format_float(f: f64) -> String {
    let s = format!("{f:?}");
    if s.contains(['.', 'e', 'E']) || !f.is_finite() {
        s
    } else {
        format!("{s}.0")
    }
}

const RESERVED: &[&str] = &[
    "for", "if", "in", "let", "package", "import", "true", "false", "null", "_",
];

fn format_label(label: &str) -> String {
    let (prefix, name) = match label.strip_prefix('#') {
        Some(rest) => ("#", rest),
        None => ("", label),
    };
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED.contains(&name);
    if plain {
        format!("{prefix}{name}")
    } else {
        quote(label)
    }
}

fn quote(s: &str) -> String {
    // JSON escaping; a literal `\(` becomes `\\(` and is not interpolated.
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn canonical(src: &str) -> String {
        format(&parse(src).unwrap(), FormatOptions::default()).unwrap()
    }

    #[test]
    fn sorted_top_level_without_braces() {
        assert_eq!(
            canonical("b: 2, a: {y: true, x: \"s\"}, c: [1, 2]"),
            "a: {\n\tx: \"s\"\n\ty: true\n}\nb: 2\nc: [1, 2]\n"
        );
    }

    #[test]
    fn floats_keep_their_kind() {
        assert_eq!(canonical("a: 2.0\nb: 1e21\nc: 2.1"), "a: 2.0\nb: 1e21\nc: 2.1\n");
        assert_eq!(format_float(3.0), "3.0");
    }

    #[test]
    fn canonical_is_idempotent() {
        let srcs = [
            "z: {b: [{x: 1}, 2], a: \"q\\\"uote\"}\n\"odd-label\": null\n#D: {x?: int, y: *1 | int}\n",
            "a: [...string]\nb: \"\\\\(not interpolated)\"\nc: -4\n",
            "",
        ];
        for src in srcs {
            let once = canonical(src);
            assert_eq!(canonical(&once), once, "source: {src:?}");
        }
    }

    #[test]
    fn final_mode_resolves_defaults_and_drops_definitions() {
        let v = parse("#D: {x: int}\na: *1 | int\nb?: string\nc: \"x\"").unwrap();
        assert_eq!(format(&v, FormatOptions::final_()).unwrap(), "a: 1\nc: \"x\"\n");
        assert!(format(&parse("a: int").unwrap(), FormatOptions::final_()).is_err());
    }

    #[test]
    fn quoted_labels() {
        assert_eq!(canonical("\"eth-1\": 1\n\"if\": 2\n"), "\"eth-1\": 1\n\"if\": 2\n");
    }
}
