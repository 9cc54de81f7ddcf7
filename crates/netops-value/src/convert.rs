//! String-to-kind coercion for path keys.

use crate::error::{ValueError, ValueResult};
use crate::value::{build_expr, Kind, Value};

/// Convert the textual form of a path key into a value of `kind`.
pub fn convert_string(kind: Kind, s: &str) -> ValueResult<Value> {
    let err = || ValueError::Conversion {
        kind,
        input: s.to_string(),
    };
    match kind {
        Kind::String => Ok(Value::String(s.to_string())),
        Kind::Int => s.trim().parse::<i64>().map(Value::Int).map_err(|_| err()),
        Kind::Float => parse_float(s).map(Value::Float).ok_or_else(err),
        Kind::Number => match s.trim().parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => parse_float(s).map(Value::Float).ok_or_else(err),
        },
        Kind::Bool => match s.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(err()),
        },
        Kind::Null => match s.trim() {
            "null" => Ok(Value::Null),
            _ => Err(err()),
        },
        Kind::List | Kind::Struct => {
            let json: serde_json::Value = serde_json::from_str(s).map_err(|_| err())?;
            let value = build_expr(&json).map_err(|_| err())?;
            if value.kind() == Some(kind) {
                Ok(value)
            } else {
                Err(err())
            }
        }
    }
}

fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}
