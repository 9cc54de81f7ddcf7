//! Leaf-level diff between two configs.

use crate::error::ValueResult;
use crate::value::Value;

/// Updates and deletes that turn `old` into `new`.
///
/// Every update addresses a leaf: a scalar, a list, or an empty struct.
/// Deletes address the root of each removed subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub updates: Vec<(Vec<String>, Value)>,
    pub deletes: Vec<Vec<String>>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Compute the diff between two concrete values.
pub fn diff(old: &Value, new: &Value) -> ValueResult<Diff> {
    let old = old.finalize()?;
    let new = new.finalize()?;
    let mut out = Diff::default();
    walk(&old, &new, &mut Vec::new(), &mut out);
    Ok(out)
}

fn walk(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Diff) {
    match (old, new) {
        (Value::Struct(a), Value::Struct(b)) => {
            for (label, nv) in b.regular() {
                path.push(label.clone());
                match a.get(label) {
                    Some(ov) => walk(ov, nv, path, out),
                    None => leaves(nv, path, out),
                }
                path.pop();
            }
            for (label, _) in a.regular() {
                if b.get(label).is_none() {
                    let mut p = path.clone();
                    p.push(label.clone());
                    out.deletes.push(p);
                }
            }
        }
        (o, n) if o == n => {}
        (_, n) => leaves(n, path, out),
    }
}

fn leaves(value: &Value, path: &mut Vec<String>, out: &mut Diff) {
    match value {
        Value::Struct(s) if !s.is_empty() => {
            for (label, v) in s.regular() {
                path.push(label.clone());
                leaves(v, path, out);
                path.pop();
            }
        }
        v => out.updates.push((path.clone(), v.clone())),
    }
}
