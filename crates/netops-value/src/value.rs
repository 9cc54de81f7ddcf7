//! Evaluated values and the lattice operations over them.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ValueError, ValueResult, display_path};

// ── Value model ────────────────────────────────────────────────

/// An evaluated value.
///
/// Concrete values (`Null`, `Bool`, `Int`, `Float`, `String`, closed
/// `List`, `Struct` of concrete fields) are the only ones that can be
/// exported. `Top`, `Type`, `OpenList` and defaultless `Disjunction`s are
/// constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `_`, unifies with anything.
    Top,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Type(BasicType),
    List(Vec<Value>),
    /// `[...T]`: any number of elements, each unifying with `T`.
    OpenList(Box<Value>),
    Struct(Struct),
    Disjunction(Vec<Alternative>),
}

/// Predeclared basic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    String,
    Int,
    Float,
    Number,
    Bool,
}

impl BasicType {
    pub fn name(self) -> &'static str {
        match self {
            BasicType::String => "string",
            BasicType::Int => "int",
            BasicType::Float => "float",
            BasicType::Number => "number",
            BasicType::Bool => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(BasicType::String),
            "int" => Some(BasicType::Int),
            "float" => Some(BasicType::Float),
            "number" => Some(BasicType::Number),
            "bool" => Some(BasicType::Bool),
            _ => None,
        }
    }

    fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (BasicType::String, Value::String(_))
                | (BasicType::Int, Value::Int(_))
                | (BasicType::Float, Value::Float(_))
                | (BasicType::Number, Value::Int(_) | Value::Float(_))
                | (BasicType::Bool, Value::Bool(_))
        )
    }

    fn meet(self, other: BasicType) -> Option<BasicType> {
        use BasicType::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Number, x @ (Int | Float)) | (x @ (Int | Float), Number) => Some(x),
            _ => None,
        }
    }

    fn kind(self) -> Kind {
        match self {
            BasicType::String => Kind::String,
            BasicType::Int => Kind::Int,
            BasicType::Float => Kind::Float,
            BasicType::Number => Kind::Number,
            BasicType::Bool => Kind::Bool,
        }
    }
}

/// One arm of a disjunction; `default` marks `*value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub value: Value,
    pub default: bool,
}

/// A struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub value: Value,
    pub optional: bool,
}

/// Fields keyed by label; iteration is sorted by label.
///
/// Labels starting with `#` are definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Struct {
    fields: BTreeMap<String, Field>,
}

impl Struct {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.fields.get(label).map(|f| &f.value)
    }

    pub fn field(&self, label: &str) -> Option<&Field> {
        self.fields.get(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        self.fields.insert(
            label.into(),
            Field {
                value,
                optional: false,
            },
        );
    }

    pub fn insert_field(&mut self, label: impl Into<String>, field: Field) {
        self.fields.insert(label.into(), field);
    }

    pub fn remove(&mut self, label: &str) -> Option<Field> {
        self.fields.remove(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    /// Regular (non-definition, non-optional) fields.
    pub fn regular(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter(|(label, f)| !is_definition(label) && !f.optional)
            .map(|(label, f)| (label, &f.value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Struct {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut s = Struct::new();
        for (label, value) in iter {
            s.insert(label, value);
        }
        s
    }
}

pub fn is_definition(label: &str) -> bool {
    label.starts_with('#')
}

/// Abstract type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Float,
    Number,
    Bool,
    Null,
    List,
    Struct,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::String => "string",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Number => "number",
            Kind::Bool => "bool",
            Kind::Null => "null",
            Kind::List => "list",
            Kind::Struct => "struct",
        };
        f.write_str(s)
    }
}

// ── Inspection ─────────────────────────────────────────────────

impl Value {
    /// Look up a field path through nested structs. Definitions are
    /// addressable by their `#` label.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let mut cur = self;
        for label in path {
            match cur {
                Value::Struct(s) => cur = s.get(label)?,
                _ => return None,
            }
        }
        Some(cur)
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The kind this value is or constrains to.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Top => None,
            Value::Null => Some(Kind::Null),
            Value::Bool(_) => Some(Kind::Bool),
            Value::Int(_) => Some(Kind::Int),
            Value::Float(_) => Some(Kind::Float),
            Value::String(_) => Some(Kind::String),
            Value::Type(t) => Some(t.kind()),
            Value::List(_) | Value::OpenList(_) => Some(Kind::List),
            Value::Struct(_) => Some(Kind::Struct),
            Value::Disjunction(alts) => {
                if let Some(def) = default_of(alts) {
                    return def.kind();
                }
                let mut kinds = alts.iter().map(|a| a.value.kind());
                let first = kinds.next()??;
                kinds.all(|k| k == Some(first)).then_some(first)
            }
        }
    }

    /// Resolve defaults, drop definitions and optional fields, and fail on
    /// anything that is not concrete.
    pub fn finalize(&self) -> ValueResult<Value> {
        finalize_at(self, &mut Vec::new())
    }

    pub fn is_concrete(&self) -> bool {
        self.finalize().is_ok()
    }

    /// Export as JSON. Definitions and optional fields are omitted.
    pub fn to_json(&self) -> ValueResult<serde_json::Value> {
        to_json_at(&self.finalize()?, &mut Vec::new())
    }
}

fn default_of(alts: &[Alternative]) -> Option<&Value> {
    let mut defaults = alts.iter().filter(|a| a.default);
    match (defaults.next(), defaults.next()) {
        (Some(d), None) => Some(&d.value),
        _ => None,
    }
}

fn finalize_at(value: &Value, path: &mut Vec<String>) -> ValueResult<Value> {
    match value {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
            Ok(value.clone())
        }
        Value::Top => Err(ValueError::incomplete(path, "value is unconstrained (_)")),
        Value::Type(t) => Err(ValueError::incomplete(
            path,
            format!("non-concrete value {}", t.name()),
        )),
        Value::OpenList(_) => Ok(Value::List(Vec::new())),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(i.to_string());
                out.push(finalize_at(item, path)?);
                path.pop();
            }
            Ok(Value::List(out))
        }
        Value::Struct(s) => {
            let mut out = Struct::new();
            for (label, v) in s.regular() {
                path.push(label.clone());
                out.insert(label.clone(), finalize_at(v, path)?);
                path.pop();
            }
            Ok(Value::Struct(out))
        }
        Value::Disjunction(alts) => match default_of(alts) {
            Some(def) => finalize_at(def, path),
            None => Err(ValueError::incomplete(
                path,
                "ambiguous disjunction without a default",
            )),
        },
    }
}

fn to_json_at(value: &Value, path: &mut Vec<String>) -> ValueResult<serde_json::Value> {
    use serde_json::Value as Json;
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| ValueError::incomplete(path, format!("{f} has no JSON form")))?,
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(i.to_string());
                out.push(to_json_at(item, path)?);
                path.pop();
            }
            Json::Array(out)
        }
        Value::Struct(s) => {
            let mut map = serde_json::Map::new();
            for (label, v) in s.regular() {
                path.push(label.clone());
                map.insert(label.clone(), to_json_at(v, path)?);
                path.pop();
            }
            Json::Object(map)
        }
        other => {
            return Err(ValueError::incomplete(
                path,
                format!("cannot export {other:?}"),
            ));
        }
    })
}

// ── Construction ───────────────────────────────────────────────

/// Build a value from decoded JSON. Integers stay `Int`, numbers with a
/// fraction or exponent stay `Float`. Integers beyond the `i64` range are
/// rejected.
pub fn build_expr(json: &serde_json::Value) -> ValueResult<Value> {
    build_expr_at(json, &mut Vec::new())
}

fn build_expr_at(json: &serde_json::Value, path: &mut Vec<String>) -> ValueResult<Value> {
    use serde_json::Value as Json;
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if n.is_f64() {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            } else {
                return Err(ValueError::OutOfRange {
                    path: display_path(path),
                    value: n.to_string(),
                });
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                path.push(idx.to_string());
                let value = build_expr_at(item, path);
                path.pop();
                list.push(value?);
            }
            Value::List(list)
        }
        Json::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (k, v) in map {
                path.push(k.clone());
                let value = build_expr_at(v, path);
                path.pop();
                fields.push((k.clone(), value?));
            }
            Value::Struct(fields.into_iter().collect())
        }
    })
}

/// Kind of the value at `path` inside `value`.
pub fn kind_of(value: &Value, path: &[&str]) -> ValueResult<Kind> {
    let target = value
        .lookup(path)
        .ok_or_else(|| ValueError::Unresolved(path.join(".")))?;
    target.kind().ok_or_else(|| {
        ValueError::incomplete(
            &path.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            "value has no single kind",
        )
    })
}

// ── Merge ──────────────────────────────────────────────────────

/// Right-wins merge: structs merge deeply, everything else (lists
/// included) is replaced by `b`.
pub fn merge(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Struct(x), Value::Struct(y)) => {
            let mut out = x.clone();
            for (label, field) in y.iter() {
                let merged = match x.field(label) {
                    Some(existing) => Field {
                        value: merge(&existing.value, &field.value),
                        optional: field.optional,
                    },
                    None => field.clone(),
                };
                out.insert_field(label.clone(), merged);
            }
            Value::Struct(out)
        }
        (_, b) => b.clone(),
    }
}

// ── Unification ────────────────────────────────────────────────

/// Lattice meet of two values.
pub fn unify(a: &Value, b: &Value) -> ValueResult<Value> {
    unify_at(a, b, &mut Vec::new())
}

pub(crate) fn unify_at(a: &Value, b: &Value, path: &mut Vec<String>) -> ValueResult<Value> {
    match (a, b) {
        (Value::Top, x) | (x, Value::Top) => Ok(x.clone()),

        (Value::Disjunction(alts), other) | (other, Value::Disjunction(alts)) => {
            unify_disjunction(alts, other, path)
        }

        (Value::Struct(x), Value::Struct(y)) => {
            let mut out = x.clone();
            for (label, field) in y.iter() {
                let merged = match x.field(label) {
                    Some(existing) => {
                        path.push(label.clone());
                        let value = unify_at(&existing.value, &field.value, path)?;
                        path.pop();
                        Field {
                            value,
                            optional: existing.optional && field.optional,
                        }
                    }
                    None => field.clone(),
                };
                out.insert_field(label.clone(), merged);
            }
            Ok(Value::Struct(out))
        }

        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Err(ValueError::conflict(
                    path,
                    format!("list length {} vs {}", xs.len(), ys.len()),
                ));
            }
            let mut out = Vec::with_capacity(xs.len());
            for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
                path.push(i.to_string());
                out.push(unify_at(x, y, path)?);
                path.pop();
            }
            Ok(Value::List(out))
        }
        (Value::OpenList(elem), Value::List(items)) | (Value::List(items), Value::OpenList(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(i.to_string());
                out.push(unify_at(elem, item, path)?);
                path.pop();
            }
            Ok(Value::List(out))
        }
        (Value::OpenList(x), Value::OpenList(y)) => {
            Ok(Value::OpenList(Box::new(unify_at(x, y, path)?)))
        }

        (Value::Type(x), Value::Type(y)) => x.meet(*y).map(Value::Type).ok_or_else(|| {
            ValueError::conflict(path, format!("{} & {}", x.name(), y.name()))
        }),
        (Value::Type(t), v) | (v, Value::Type(t)) => {
            if t.admits(v) {
                Ok(v.clone())
            } else {
                Err(ValueError::conflict(
                    path,
                    format!("{} does not admit {}", t.name(), describe(v)),
                ))
            }
        }

        (x, y) if scalar_eq(x, y) => Ok(x.clone()),
        (x, y) => Err(ValueError::conflict(
            path,
            format!("{} != {}", describe(x), describe(y)),
        )),
    }
}

fn unify_disjunction(
    alts: &[Alternative],
    other: &Value,
    path: &mut Vec<String>,
) -> ValueResult<Value> {
    let others: Vec<Alternative> = match other {
        Value::Disjunction(o) => o.clone(),
        v => vec![Alternative {
            value: v.clone(),
            default: true,
        }],
    };
    let other_has_default = others.iter().any(|a| a.default);
    let self_has_default = alts.iter().any(|a| a.default);

    let mut out: Vec<Alternative> = Vec::new();
    for a in alts {
        for b in &others {
            if let Ok(value) = unify_at(&a.value, &b.value, path) {
                let default = (a.default || !self_has_default) && (b.default || !other_has_default);
                push_alternative(&mut out, Alternative { value, default });
            }
        }
    }
    if out.is_empty() {
        return Err(ValueError::conflict(
            path,
            format!("no disjunct matches {}", describe(other)),
        ));
    }
    Ok(normalize_disjunction(out))
}

fn push_alternative(out: &mut Vec<Alternative>, alt: Alternative) {
    match out.iter_mut().find(|a| a.value == alt.value) {
        Some(existing) => existing.default |= alt.default,
        None => out.push(alt),
    }
}

/// Collapse a single-alternative disjunction and drop default markers
/// that apply to every arm.
pub(crate) fn normalize_disjunction(alts: Vec<Alternative>) -> Value {
    let mut deduped = Vec::with_capacity(alts.len());
    for alt in alts {
        push_alternative(&mut deduped, alt);
    }
    if deduped.len() == 1 {
        return deduped.remove(0).value;
    }
    if deduped.iter().all(|a| a.default) {
        for a in &mut deduped {
            a.default = false;
        }
    }
    Value::Disjunction(deduped)
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}

pub(crate) fn describe(v: &Value) -> String {
    match v {
        Value::Top => "_".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f:?}"),
        Value::String(s) => format!("{s:?}"),
        Value::Type(t) => t.name().to_string(),
        Value::List(_) | Value::OpenList(_) => "list".to_string(),
        Value::Struct(_) => "struct".to_string(),
        Value::Disjunction(_) => "disjunction".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: &[(&str, Value)]) -> Value {
        Value::Struct(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn json_preserves_int_and_float() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"i":2,"f":2.0,"g":2.1,"l":[1,"x",null]}"#).unwrap();
        let v = build_expr(&json).unwrap();
        assert_eq!(v.lookup(&["i"]), Some(&Value::Int(2)));
        assert_eq!(v.lookup(&["f"]), Some(&Value::Float(2.0)));
        assert_eq!(v.to_json().unwrap(), json);
    }

    #[test]
    fn json_integers_beyond_i64_are_rejected() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a":{"big":18446744073709551615}}"#).unwrap();
        let err = build_expr(&json).unwrap_err();
        assert!(matches!(
            &err,
            ValueError::OutOfRange { path, value } if path == "a.big" && value == "18446744073709551615"
        ));

        let json: serde_json::Value =
            serde_json::from_str(r#"{"min":-9223372036854775808}"#).unwrap();
        assert_eq!(
            build_expr(&json).unwrap().lookup(&["min"]),
            Some(&Value::Int(i64::MIN))
        );
    }

    #[test]
    fn unify_type_and_value() {
        assert_eq!(
            unify(&Value::Type(BasicType::Int), &Value::Int(3)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            unify(&Value::Type(BasicType::Number), &Value::Type(BasicType::Float)).unwrap(),
            Value::Type(BasicType::Float)
        );
        assert!(unify(&Value::Type(BasicType::Int), &Value::Float(1.0)).is_err());
    }

    #[test]
    fn unify_conflict_names_path() {
        let a = obj(&[("a", obj(&[("b", Value::Int(1))]))]);
        let b = obj(&[("a", obj(&[("b", Value::Int(2))]))]);
        match unify(&a, &b) {
            Err(ValueError::Conflict { path, .. }) => assert_eq!(path, "a.b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disjunction_default_resolution() {
        let d = Value::Disjunction(vec![
            Alternative {
                value: Value::Int(1),
                default: true,
            },
            Alternative {
                value: Value::Type(BasicType::Int),
                default: false,
            },
        ]);
        assert_eq!(d.finalize().unwrap(), Value::Int(1));
        assert_eq!(d.kind(), Some(Kind::Int));
        assert_eq!(unify(&d, &Value::Int(5)).unwrap(), Value::Int(5));
        assert!(unify(&d, &Value::String("x".into())).is_err());
    }

    #[test]
    fn merge_right_wins_and_replaces_lists() {
        let a = obj(&[
            ("keep", Value::Int(1)),
            ("n", obj(&[("x", Value::Int(1)), ("y", Value::Int(1))])),
            ("l", Value::List(vec![Value::Int(1), Value::Int(2)])),
        ]);
        let b = obj(&[
            ("n", obj(&[("y", Value::Int(2))])),
            ("l", Value::List(vec![Value::Int(3)])),
        ]);
        let m = merge(&a, &b);
        assert_eq!(m.lookup(&["keep"]), Some(&Value::Int(1)));
        assert_eq!(m.lookup(&["n", "x"]), Some(&Value::Int(1)));
        assert_eq!(m.lookup(&["n", "y"]), Some(&Value::Int(2)));
        assert_eq!(m.lookup(&["l"]), Some(&Value::List(vec![Value::Int(3)])));
    }

    #[test]
    fn finalize_drops_definitions_and_optionals() {
        let mut s = Struct::new();
        s.insert("#Def", Value::Type(BasicType::String));
        s.insert_field(
            "opt",
            Field {
                value: Value::Type(BasicType::Int),
                optional: true,
            },
        );
        s.insert("x", Value::Int(1));
        let v = Value::Struct(s).finalize().unwrap();
        assert_eq!(v, obj(&[("x", Value::Int(1))]));
    }

    #[test]
    fn kind_of_reports_constraint_kind() {
        let v = obj(&[(
            "#Input",
            obj(&[
                ("bar", Value::Type(BasicType::String)),
                ("baz", Value::Type(BasicType::Int)),
            ]),
        )]);
        assert_eq!(kind_of(&v, &["#Input", "baz"]).unwrap(), Kind::Int);
        assert!(kind_of(&v, &["#Input", "missing"]).is_err());
    }
}
