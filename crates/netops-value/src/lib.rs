//! netops-value — the typed-configuration language.
//!
//! A small CUE-flavoured language used for service inputs, transformation
//! modules and device configs. Values form a lattice: basic types
//! (`string`, `int`, …) constrain concrete values, and unification (`&`)
//! combines constraints and data.
//!
//! # Components
//!
//! - **`value`** — the evaluated `Value` model, unification, merge, JSON
//! - **`ast`** / **`parse`** — syntax tree and nom-based parser
//! - **`eval`** — evaluator with lexical references and comprehensions
//! - **`format`** — canonical text output
//! - **`load`** — multi-file instances with same-directory imports
//! - **`convert`** — string-to-kind coercion for path keys
//! - **`diff`** — leaf-level diff between two configs

pub mod ast;
pub mod convert;
pub mod diff;
pub mod error;
pub mod eval;
pub mod format;
pub mod load;
pub mod parse;
pub mod value;

pub use convert::convert_string;
pub use diff::{Diff, diff};
pub use error::{ValueError, ValueResult};
pub use format::{FormatOptions, format};
pub use load::{Instance, load_instance};
pub use value::{Alternative, BasicType, Field, Kind, Struct, Value, build_expr, kind_of, merge, unify};

/// Parse and evaluate a single source text into a value.
///
/// Imports are not available; use [`load_instance`] for multi-file modules.
pub fn parse(src: &str) -> ValueResult<Value> {
    let file = parse::parse_file(src)?;
    if let Some(import) = file.imports.first() {
        return Err(ValueError::Eval(format!(
            "import \"{}\" requires loading an instance",
            import.path
        )));
    }
    eval::eval_file(&file, Default::default())
}
