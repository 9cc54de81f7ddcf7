//! Multi-file instances.
//!
//! An instance is the unification of one or more files from a single
//! directory. `import "name"` resolves to `<dir>/name.cue`, evaluated on
//! its own and bound under its alias.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{Decl, Expr, File, Label};
use crate::error::{ValueError, ValueResult};
use crate::eval::Root;
use crate::parse::parse_file;
use crate::value::Value;

const EXT: &str = "cue";

/// A loaded, not yet evaluated, instance.
#[derive(Debug, Clone)]
pub struct Instance {
    dir: PathBuf,
    files: Vec<Arc<Vec<Decl>>>,
    imports: BTreeMap<String, Value>,
}

impl Instance {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Evaluate the instance root.
    pub fn value(&self) -> ValueResult<Value> {
        Root::new(&self.files, self.imports.clone()).value()
    }

    /// Evaluate `<definition> & { <field>: value }` in the instance scope.
    pub fn eval_with(&self, definition: &str, field: &str, value: Value) -> ValueResult<Value> {
        let expr = Expr::Unify(
            Box::new(Expr::Ref(definition.to_string())),
            Box::new(Expr::Struct(Arc::new(vec![Decl::Field {
                label: Label::Static(field.to_string()),
                optional: false,
                value: Expr::Literal(value),
            }]))),
        );
        Root::new(&self.files, self.imports.clone()).eval(&expr)
    }

    /// Evaluate the root and return the value at `path`.
    pub fn lookup(&self, path: &[&str]) -> ValueResult<Value> {
        self.value()?
            .lookup(path)
            .cloned()
            .ok_or_else(|| ValueError::Unresolved(path.join(".")))
    }
}

/// Load an instance from `dir`.
///
/// `entrypoints` are file names relative to `dir`; when empty, every
/// `*.cue` file directly in `dir` is used.
pub fn load_instance(entrypoints: &[&str], dir: &Path) -> ValueResult<Instance> {
    let names: Vec<PathBuf> = if entrypoints.is_empty() {
        let entries = std::fs::read_dir(dir).map_err(|source| ValueError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut names: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == EXT))
            .collect();
        names.sort();
        names
    } else {
        entrypoints.iter().map(|e| dir.join(e)).collect()
    };
    if names.is_empty() {
        return Err(ValueError::Eval(format!(
            "no {EXT} files in {}",
            dir.display()
        )));
    }

    let mut package: Option<String> = None;
    let mut files = Vec::with_capacity(names.len());
    let mut imports = BTreeMap::new();
    let mut loading = BTreeSet::new();
    for path in &names {
        let file = read_file(path)?;
        match (&package, &file.package) {
            (Some(a), Some(b)) if a != b => {
                return Err(ValueError::Eval(format!(
                    "{}: package {b} differs from {a}",
                    path.display()
                )));
            }
            (None, Some(b)) => package = Some(b.clone()),
            _ => {}
        }
        resolve_imports(&file, path, dir, &mut imports, &mut loading)?;
        files.push(file.decls.clone());
    }
    debug!(dir = %dir.display(), files = files.len(), imports = imports.len(), "loaded instance");

    Ok(Instance {
        dir: dir.to_path_buf(),
        files,
        imports,
    })
}

fn read_file(path: &Path) -> ValueResult<File> {
    let src = std::fs::read_to_string(path).map_err(|source| ValueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_file(&src).map_err(|e| e.in_file(path))
}

fn resolve_imports(
    file: &File,
    path: &Path,
    dir: &Path,
    imports: &mut BTreeMap<String, Value>,
    loading: &mut BTreeSet<PathBuf>,
) -> ValueResult<()> {
    for import in &file.imports {
        let target = dir.join(format!("{}.{EXT}", import.path));
        if !loading.insert(target.clone()) {
            return Err(ValueError::Eval(format!(
                "{}: import cycle through \"{}\"",
                path.display(),
                import.path
            )));
        }
        let imported = read_file(&target)?;
        let mut nested = BTreeMap::new();
        resolve_imports(&imported, &target, dir, &mut nested, loading)?;
        let value = Root::new(std::slice::from_ref(&imported.decls), nested)
            .value()
            .map_err(|e| e.in_file(&target))?;
        loading.remove(&target);

        if let Some(existing) = imports.get(&import.alias) {
            if *existing != value {
                return Err(ValueError::Eval(format!(
                    "{}: import alias \"{}\" bound twice",
                    path.display(),
                    import.alias
                )));
            }
        }
        imports.insert(import.alias.clone(), value);
    }
    Ok(())
}
