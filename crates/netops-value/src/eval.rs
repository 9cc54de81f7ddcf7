//! Evaluator.
//!
//! Struct literals evaluate lazily to a list of bodies; unifying two
//! structs concatenates their bodies, and fields are resolved on demand.
//! This lets a template refer to `input.vlan` while `input` is supplied by
//! a later unification. References resolve lexically through the chain of
//! enclosing frames; only statically labelled fields are referenceable.

use std::cell::{Cell, RefCell};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{BinOp, Clause, Decl, Expr, File, Label, StrPart, UnOp};
use crate::error::{ValueError, ValueResult};
use crate::format::format_float;
use crate::value::{describe, normalize_disjunction, unify, Alternative, Field, Struct, Value};

const MAX_DEPTH: usize = 128;

#[derive(Clone)]
enum Body {
    Decls {
        decls: Arc<Vec<Decl>>,
        outer: Option<Rc<Env>>,
    },
    Value(Struct),
}

#[derive(Clone)]
enum Partial {
    Value(Value),
    Struct(Vec<Body>),
}

struct Frame {
    bodies: Vec<Body>,
    bindings: BTreeMap<String, Value>,
    evaluating: RefCell<HashSet<String>>,
}

impl Frame {
    fn with_bodies(bodies: Vec<Body>) -> Self {
        Self {
            bodies,
            bindings: BTreeMap::new(),
            evaluating: RefCell::new(HashSet::new()),
        }
    }

    fn with_bindings(bindings: BTreeMap<String, Value>) -> Self {
        Self {
            bodies: Vec::new(),
            bindings,
            evaluating: RefCell::new(HashSet::new()),
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.bodies.iter().any(|body| match body {
            Body::Value(s) => s.field(name).is_some(),
            Body::Decls { decls, .. } => decls.iter().any(|d| {
                matches!(d, Decl::Field { label: Label::Static(l), .. } if l == name)
            }),
        })
    }
}

struct Env {
    frame: Rc<Frame>,
    outer: Option<Rc<Env>>,
}

/// Evaluate a single parsed file with the given imported values in scope.
pub fn eval_file(file: &File, imports: BTreeMap<String, Value>) -> ValueResult<Value> {
    let root = Root::new(std::slice::from_ref(&file.decls), imports);
    root.value()
}

/// The unified top level of one or more files.
pub(crate) struct Root {
    env: Rc<Env>,
    evaluator: Evaluator,
}

impl Root {
    pub(crate) fn new(files: &[Arc<Vec<Decl>>], imports: BTreeMap<String, Value>) -> Self {
        let import_env = Rc::new(Env {
            frame: Rc::new(Frame::with_bindings(imports)),
            outer: None,
        });
        let bodies = files
            .iter()
            .map(|decls| Body::Decls {
                decls: decls.clone(),
                outer: Some(import_env.clone()),
            })
            .collect();
        Self {
            env: Rc::new(Env {
                frame: Rc::new(Frame::with_bodies(bodies)),
                outer: Some(import_env),
            }),
            evaluator: Evaluator::default(),
        }
    }

    pub(crate) fn value(&self) -> ValueResult<Value> {
        self.evaluator.force_frame(&self.env.frame)
    }

    /// Evaluate `expr` with the root's fields in scope.
    pub(crate) fn eval(&self, expr: &Expr) -> ValueResult<Value> {
        let partial = self.evaluator.eval(expr, &self.env)?;
        self.evaluator.force(partial)
    }
}

#[derive(Default)]
struct Evaluator {
    depth: Cell<usize>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

type FieldSet = BTreeMap<String, (bool, Partial)>;

impl Evaluator {
    fn enter(&self) -> ValueResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return Err(ValueError::Eval(
                "evaluation too deep; structural reference cycle?".to_string(),
            ));
        }
        self.depth.set(depth);
        Ok(DepthGuard(&self.depth))
    }

    // ── Expressions ────────────────────────────────────────────

    fn eval(&self, expr: &Expr, env: &Rc<Env>) -> ValueResult<Partial> {
        Ok(match expr {
            Expr::Top => Partial::Value(Value::Top),
            Expr::Null => Partial::Value(Value::Null),
            Expr::Bool(b) => Partial::Value(Value::Bool(*b)),
            Expr::Int(i) => Partial::Value(Value::Int(*i)),
            Expr::Float(f) => Partial::Value(Value::Float(*f)),
            Expr::Type(t) => Partial::Value(Value::Type(*t)),
            Expr::Literal(v) => Partial::Value(v.clone()),
            Expr::Str(parts) => Partial::Value(Value::String(self.interpolate(parts, env)?)),
            Expr::Ref(name) => self.resolve(name, env)?,
            Expr::Struct(decls) => Partial::Struct(vec![Body::Decls {
                decls: decls.clone(),
                outer: Some(env.clone()),
            }]),
            Expr::List { elems, rest } => {
                let rest = match rest {
                    Some(r) => Some(self.force(self.eval(r, env)?)?),
                    None => None,
                };
                let mut items = Vec::with_capacity(elems.len());
                for e in elems {
                    let item = self.force(self.eval(e, env)?)?;
                    items.push(match &rest {
                        Some(r) => unify(r, &item)?,
                        None => item,
                    });
                }
                match rest {
                    Some(r) if items.is_empty() => Partial::Value(Value::OpenList(Box::new(r))),
                    _ => Partial::Value(Value::List(items)),
                }
            }
            Expr::Select(base, label) => {
                let base = self.eval(base, env)?;
                self.select(base, label)?
            }
            Expr::Index(base, index) => {
                let base = self.force(self.eval(base, env)?)?;
                let index = self.concrete(self.eval(index, env)?)?;
                match (base, index) {
                    (Value::List(items), Value::Int(i)) => usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .map(Partial::Value)
                        .ok_or_else(|| ValueError::Eval(format!("index {i} out of range")))?,
                    (Value::Struct(s), Value::String(label)) => Partial::Value(
                        s.get(&label)
                            .cloned()
                            .ok_or(ValueError::Unresolved(label))?,
                    ),
                    (base, index) => {
                        return Err(ValueError::Eval(format!(
                            "cannot index {} with {}",
                            describe(&base),
                            describe(&index)
                        )));
                    }
                }
            }
            Expr::Unify(a, b) => {
                let a = self.eval(a, env)?;
                let b = self.eval(b, env)?;
                self.unify_partial(a, b)?
            }
            Expr::Disjunction(arms) => {
                let mut alts = Vec::with_capacity(arms.len());
                for (arm, default) in arms {
                    alts.push(Alternative {
                        value: self.force(self.eval(arm, env)?)?,
                        default: *default,
                    });
                }
                Partial::Value(normalize_disjunction(alts))
            }
            Expr::Binary(op, a, b) => {
                let a = self.concrete(self.eval(a, env)?)?;
                let b = self.concrete(self.eval(b, env)?)?;
                Partial::Value(binary(*op, a, b)?)
            }
            Expr::Unary(op, e) => {
                let v = self.concrete(self.eval(e, env)?)?;
                Partial::Value(match (op, v) {
                    (UnOp::Neg, Value::Int(i)) => Value::Int(i.checked_neg().ok_or_else(|| {
                        ValueError::Eval("integer overflow in Neg".to_string())
                    })?),
                    (UnOp::Neg, Value::Float(f)) => Value::Float(-f),
                    (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    (_, v) => {
                        return Err(ValueError::Eval(format!(
                            "invalid operand {}",
                            describe(&v)
                        )));
                    }
                })
            }
        })
    }

    fn resolve(&self, name: &str, env: &Rc<Env>) -> ValueResult<Partial> {
        let mut cur = Some(env.clone());
        while let Some(e) = cur {
            if let Some(v) = e.frame.bindings.get(name) {
                return Ok(Partial::Value(v.clone()));
            }
            if e.frame.declares(name) {
                return self.field(&e.frame, name);
            }
            cur = e.outer.clone();
        }
        Err(ValueError::Unresolved(name.to_string()))
    }

    /// Unified contributions of every static declaration of `name`.
    fn field(&self, frame: &Rc<Frame>, name: &str) -> ValueResult<Partial> {
        if !frame.evaluating.borrow_mut().insert(name.to_string()) {
            return Err(ValueError::Eval(format!("reference cycle at \"{name}\"")));
        }
        let result = self.field_contributions(frame, name);
        frame.evaluating.borrow_mut().remove(name);
        result
    }

    fn field_contributions(&self, frame: &Rc<Frame>, name: &str) -> ValueResult<Partial> {
        let _guard = self.enter()?;
        let mut acc: Option<Partial> = None;
        for body in &frame.bodies {
            match body {
                Body::Value(s) => {
                    if let Some(v) = s.get(name) {
                        acc = Some(self.merge_into(acc, Partial::Value(v.clone()))?);
                    }
                }
                Body::Decls { decls, outer } => {
                    let env = Rc::new(Env {
                        frame: frame.clone(),
                        outer: outer.clone(),
                    });
                    for decl in decls.iter() {
                        if let Decl::Field {
                            label: Label::Static(label),
                            value,
                            ..
                        } = decl
                        {
                            if label == name {
                                let p = tolerate(self.eval(value, &env))?
                                    .unwrap_or(Partial::Value(Value::Top));
                                acc = Some(self.merge_into(acc, p)?);
                            }
                        }
                    }
                }
            }
        }
        acc.ok_or_else(|| ValueError::Unresolved(name.to_string()))
    }

    fn merge_into(&self, acc: Option<Partial>, p: Partial) -> ValueResult<Partial> {
        match acc {
            None => Ok(p),
            Some(prev) => self.unify_partial(prev, p),
        }
    }

    fn select(&self, base: Partial, label: &str) -> ValueResult<Partial> {
        match base {
            Partial::Struct(bodies) => {
                let frame = Rc::new(Frame::with_bodies(bodies));
                if frame.declares(label) {
                    self.field(&frame, label)
                } else {
                    let value = self.force_frame(&frame)?;
                    select_value(value, label).map(Partial::Value)
                }
            }
            Partial::Value(v) => select_value(v, label).map(Partial::Value),
        }
    }

    fn unify_partial(&self, a: Partial, b: Partial) -> ValueResult<Partial> {
        Ok(match (a, b) {
            (Partial::Struct(mut x), Partial::Struct(y)) => {
                x.extend(y);
                Partial::Struct(x)
            }
            (Partial::Struct(mut x), Partial::Value(Value::Struct(s)))
            | (Partial::Value(Value::Struct(s)), Partial::Struct(mut x)) => {
                x.push(Body::Value(s));
                Partial::Struct(x)
            }
            (Partial::Struct(x), Partial::Value(Value::Top))
            | (Partial::Value(Value::Top), Partial::Struct(x)) => Partial::Struct(x),
            (Partial::Struct(x), Partial::Value(v)) | (Partial::Value(v), Partial::Struct(x)) => {
                let forced = self.force(Partial::Struct(x))?;
                Partial::Value(unify(&forced, &v)?)
            }
            (Partial::Value(a), Partial::Value(b)) => Partial::Value(unify(&a, &b)?),
        })
    }

    fn force(&self, p: Partial) -> ValueResult<Value> {
        match p {
            Partial::Value(v) => Ok(v),
            Partial::Struct(bodies) => self.force_frame(&Rc::new(Frame::with_bodies(bodies))),
        }
    }

    fn concrete(&self, p: Partial) -> ValueResult<Value> {
        self.force(p)?.finalize()
    }

    // ── Structs ────────────────────────────────────────────────

    fn force_frame(&self, frame: &Rc<Frame>) -> ValueResult<Value> {
        let _guard = self.enter()?;
        let mut fields = FieldSet::new();
        let mut embedded: Option<Value> = None;
        for body in &frame.bodies {
            match body {
                Body::Value(s) => {
                    for (label, f) in s.iter() {
                        self.add_field(
                            &mut fields,
                            label.clone(),
                            f.optional,
                            Partial::Value(f.value.clone()),
                        )?;
                    }
                }
                Body::Decls { decls, outer } => {
                    let env = Rc::new(Env {
                        frame: frame.clone(),
                        outer: outer.clone(),
                    });
                    self.collect(decls, &env, &mut fields, &mut embedded)?;
                }
            }
        }

        let mut out = Struct::new();
        for (label, (optional, partial)) in fields {
            let value = match tolerate(self.force(partial)) {
                Ok(v) => v.unwrap_or(Value::Top),
                Err(e) => return Err(nest(e, &label)),
            };
            out.insert_field(label, Field { value, optional });
        }
        match embedded {
            None => Ok(Value::Struct(out)),
            Some(v) if out.is_empty() => Ok(v),
            Some(v) => unify(&Value::Struct(out), &v),
        }
    }

    fn collect(
        &self,
        decls: &[Decl],
        env: &Rc<Env>,
        fields: &mut FieldSet,
        embedded: &mut Option<Value>,
    ) -> ValueResult<()> {
        for decl in decls {
            match decl {
                Decl::Field {
                    label,
                    optional,
                    value,
                } => {
                    let Some(name) = tolerate(self.label(label, env))? else {
                        continue;
                    };
                    let p = tolerate(self.eval(value, env))
                        .map_err(|e| nest(e, &name))?
                        .unwrap_or(Partial::Value(Value::Top));
                    self.add_field(fields, name, *optional, p)?;
                }
                Decl::Embed(e) => match tolerate(self.eval(e, env).and_then(|p| self.force(p)))? {
                    None => {}
                    Some(Value::Struct(s)) => {
                        for (label, f) in s.iter() {
                            self.add_field(
                                fields,
                                label.clone(),
                                f.optional,
                                Partial::Value(f.value.clone()),
                            )?;
                        }
                    }
                    Some(v) => {
                        *embedded = Some(match embedded.take() {
                            Some(prev) => unify(&prev, &v)?,
                            None => v,
                        });
                    }
                },
                Decl::Comprehension { clauses, body } => {
                    tolerate(self.comprehend(clauses, body, env, fields, embedded))?;
                }
            }
        }
        Ok(())
    }

    fn comprehend(
        &self,
        clauses: &[Clause],
        body: &Arc<Vec<Decl>>,
        env: &Rc<Env>,
        fields: &mut FieldSet,
        embedded: &mut Option<Value>,
    ) -> ValueResult<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return self.collect(body, env, fields, embedded);
        };
        match clause {
            Clause::If(cond) => match self.concrete(self.eval(cond, env)?)? {
                Value::Bool(true) => self.comprehend(rest, body, env, fields, embedded),
                Value::Bool(false) => Ok(()),
                other => Err(ValueError::Eval(format!(
                    "if condition must be bool, found {}",
                    describe(&other)
                ))),
            },
            Clause::For { key, value, source } => {
                let items: Vec<(Value, Value)> = match self.concrete(self.eval(source, env)?)? {
                    Value::List(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64), v))
                        .collect(),
                    Value::Struct(s) => s
                        .regular()
                        .map(|(label, v)| (Value::String(label.clone()), v.clone()))
                        .collect(),
                    other => {
                        return Err(ValueError::Eval(format!(
                            "cannot iterate over {}",
                            describe(&other)
                        )));
                    }
                };
                for (k, v) in items {
                    let mut bindings = BTreeMap::new();
                    if let Some(key) = key {
                        bindings.insert(key.clone(), k);
                    }
                    bindings.insert(value.clone(), v);
                    let inner = Rc::new(Env {
                        frame: Rc::new(Frame::with_bindings(bindings)),
                        outer: Some(env.clone()),
                    });
                    self.comprehend(rest, body, &inner, fields, embedded)?;
                }
                Ok(())
            }
        }
    }

    fn add_field(
        &self,
        fields: &mut FieldSet,
        name: String,
        optional: bool,
        p: Partial,
    ) -> ValueResult<()> {
        match fields.entry(name) {
            Entry::Vacant(e) => {
                e.insert((optional, p));
            }
            Entry::Occupied(mut e) => {
                let label = e.key().clone();
                let (was_optional, prev) = e.get_mut();
                *was_optional = *was_optional && optional;
                let current = std::mem::replace(prev, Partial::Value(Value::Top));
                *prev = self
                    .unify_partial(current, p)
                    .map_err(|err| nest(err, &label))?;
            }
        }
        Ok(())
    }

    fn label(&self, label: &Label, env: &Rc<Env>) -> ValueResult<String> {
        match label {
            Label::Static(s) => Ok(s.clone()),
            Label::Dynamic(e) => match self.concrete(self.eval(e, env)?)? {
                Value::String(s) => Ok(s),
                other => Err(ValueError::Eval(format!(
                    "dynamic label must be a string, found {}",
                    describe(&other)
                ))),
            },
        }
    }

    fn interpolate(&self, parts: &[StrPart], env: &Rc<Env>) -> ValueResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Lit(s) => out.push_str(s),
                StrPart::Interp(e) => match self.concrete(self.eval(e, env)?)? {
                    Value::String(s) => out.push_str(&s),
                    Value::Int(i) => out.push_str(&i.to_string()),
                    Value::Float(f) => out.push_str(&format_float(f)),
                    Value::Bool(b) => out.push_str(&b.to_string()),
                    other => {
                        return Err(ValueError::Eval(format!(
                            "cannot interpolate {}",
                            describe(&other)
                        )));
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Incomplete values (types where data is needed) are not errors while
/// evaluating: the field stays unconstrained until unified with data.
fn tolerate<T>(r: ValueResult<T>) -> ValueResult<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(ValueError::Incomplete { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn select_value(v: Value, label: &str) -> ValueResult<Value> {
    match v {
        Value::Struct(s) => s
            .get(label)
            .cloned()
            .ok_or_else(|| ValueError::Unresolved(label.to_string())),
        Value::Disjunction(_) => select_value(v.finalize()?, label),
        other => Err(ValueError::Eval(format!(
            "cannot select \"{label}\" from {}",
            describe(&other)
        ))),
    }
}

fn nest(err: ValueError, label: &str) -> ValueError {
    match err {
        ValueError::Conflict { path, detail } => ValueError::Conflict {
            path: prefix(label, &path),
            detail,
        },
        ValueError::Incomplete { path, detail } => ValueError::Incomplete {
            path: prefix(label, &path),
            detail,
        },
        other => other,
    }
}

fn prefix(label: &str, path: &str) -> String {
    if path == "<root>" || path.is_empty() {
        label.to_string()
    } else if path == label || path.starts_with(&format!("{label}.")) {
        path.to_string()
    } else {
        format!("{label}.{path}")
    }
}

fn binary(op: BinOp, a: Value, b: Value) -> ValueResult<Value> {
    use Value::{Bool, Float, Int, List, String as Str};
    let invalid = |a: &Value, b: &Value| {
        ValueError::Eval(format!(
            "invalid operands {} and {} for {op:?}",
            describe(a),
            describe(b)
        ))
    };
    let overflow = || ValueError::Eval(format!("integer overflow in {op:?}"));
    Ok(match op {
        BinOp::Add => match (a, b) {
            (Int(x), Int(y)) => Int(x.checked_add(y).ok_or_else(overflow)?),
            (Str(x), Str(y)) => Str(x + &y),
            (List(mut x), List(y)) => {
                x.extend(y);
                List(x)
            }
            (a, b) => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => Float(x + y),
                _ => return Err(invalid(&a, &b)),
            },
        },
        BinOp::Sub => match (a, b) {
            (Int(x), Int(y)) => Int(x.checked_sub(y).ok_or_else(overflow)?),
            (a, b) => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => Float(x - y),
                _ => return Err(invalid(&a, &b)),
            },
        },
        BinOp::Mul => match (a, b) {
            (Int(x), Int(y)) => Int(x.checked_mul(y).ok_or_else(overflow)?),
            (a, b) => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => Float(x * y),
                _ => return Err(invalid(&a, &b)),
            },
        },
        BinOp::Div => match (as_f64(&a), as_f64(&b)) {
            (Some(_), Some(y)) if y == 0.0 => {
                return Err(ValueError::Eval("division by zero".to_string()));
            }
            (Some(x), Some(y)) => Float(x / y),
            _ => return Err(invalid(&a, &b)),
        },
        BinOp::Eq => Bool(values_equal(&a, &b)),
        BinOp::Ne => Bool(!values_equal(&a, &b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&a, &b) {
                (Str(x), Str(y)) => x.partial_cmp(y),
                _ => match (as_f64(&a), as_f64(&b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            }
            .ok_or_else(|| invalid(&a, &b))?;
            Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    })
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use crate::parse;
    use crate::value::{BasicType, Value};

    fn eval(src: &str) -> Value {
        parse(src).unwrap()
    }

    #[test]
    fn references_and_arithmetic() {
        let v = eval("a: 1\nb: a + 2\nc: {d: b * 2}\ne: c.d / 2\n");
        assert_eq!(v.lookup(&["b"]), Some(&Value::Int(3)));
        assert_eq!(v.lookup(&["c", "d"]), Some(&Value::Int(6)));
        assert_eq!(v.lookup(&["e"]), Some(&Value::Float(3.0)));
    }

    #[test]
    fn repeated_fields_unify() {
        let v = eval("a: int\na: 3\nb: {x: 1}\nb: {y: 2}\n");
        assert_eq!(v.lookup(&["a"]), Some(&Value::Int(3)));
        assert_eq!(v.lookup(&["b", "y"]), Some(&Value::Int(2)));
        assert!(parse("a: 1\na: 2\n").is_err());
    }

    #[test]
    fn lazy_template_binding() {
        let v = eval(
            r#"
#T: {
	input: {name: string}
	output: "hello \(input.name)"
}
x: #T & {input: name: "world"}
"#,
        );
        assert_eq!(
            v.lookup(&["x", "output"]),
            Some(&Value::String("hello world".into()))
        );
        assert_eq!(
            v.lookup(&["#T", "input", "name"]),
            Some(&Value::Type(BasicType::String))
        );
    }

    #[test]
    fn comprehensions_and_dynamic_labels() {
        let v = eval(
            r#"
ports: [1, 2, 3]
out: {
	for i, p in ports if p > 1 {
		"eth\(p)": {index: i}
	}
}
"#,
        );
        assert_eq!(v.lookup(&["out", "eth2", "index"]), Some(&Value::Int(1)));
        assert_eq!(v.lookup(&["out", "eth3", "index"]), Some(&Value::Int(2)));
        assert!(v.lookup(&["out", "eth1"]).is_none());
    }

    #[test]
    fn reference_cycle_is_an_error() {
        assert!(parse("a: b\nb: a\n").is_err());
        assert!(parse("a: {b: a}\n").is_err());
    }

    #[test]
    fn unresolved_reference() {
        assert!(matches!(
            parse("a: missing"),
            Err(crate::ValueError::Unresolved(_))
        ));
    }
}
