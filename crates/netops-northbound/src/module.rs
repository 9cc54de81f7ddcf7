//! Per-kind service modules as seen by the northbound API: the ordered
//! key list from `metadata.json` and the `#Input` schema from
//! `transform.cue`.

use std::path::Path;

use netops_core::{METADATA_FILE, ServiceMetadata, ServicePath, TRANSFORM_FILE};
use netops_value::{Struct, Value, convert_string, kind_of, load_instance, unify};

use crate::error::{NorthboundError, NorthboundResult};

const INPUT_DEFINITION: &str = "#Input";

#[derive(Debug, Clone)]
pub struct ServiceModule {
    pub kind: String,
    pub metadata: ServiceMetadata,
    input: Value,
}

impl ServiceModule {
    /// Load the module for `kind` from the config worktree at `root`.
    pub fn load(root: &Path, kind: &str) -> NorthboundResult<Self> {
        let dir_rel = ServicePath::kind_dir(kind);
        let dir = root.join(&dir_rel);
        if !dir.join(TRANSFORM_FILE).is_file() {
            return Err(NorthboundError::invalid(format!(
                "unknown service kind {kind:?}"
            )));
        }

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = match std::fs::read(&metadata_path) {
            Ok(bytes) => serde_json::from_slice::<ServiceMetadata>(&bytes).map_err(|e| {
                NorthboundError::invalid(format!("{dir_rel}/metadata.json: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServiceMetadata::default(),
            Err(e) => return Err(NorthboundError::io(metadata_path.display().to_string(), e)),
        };

        let instance = load_instance(&[TRANSFORM_FILE], &dir)
            .map_err(|e| NorthboundError::value(&dir_rel, e))?;
        let input = instance
            .lookup(&[INPUT_DEFINITION])
            .map_err(|e| NorthboundError::value(&dir_rel, e))?;

        Ok(Self {
            kind: kind.to_string(),
            metadata,
            input,
        })
    }

    /// Ordered input keys addressing an instance of this service.
    pub fn keys(&self) -> &[String] {
        &self.metadata.keys
    }

    /// The path keys of `service` converted to the kinds `#Input`
    /// declares for them.
    pub fn key_values(&self, service: &ServicePath) -> NorthboundResult<Value> {
        let mut fields = Struct::default();
        for (key, raw) in self.keys().iter().zip(&service.keys) {
            let kind = kind_of(&self.input, &[key.as_str()])
                .map_err(|e| NorthboundError::invalid(format!("key {key}: {e}")))?;
            let value = convert_string(kind, raw)
                .map_err(|e| NorthboundError::invalid(format!("key {key}: {e}")))?;
            fields.insert(key.clone(), value);
        }
        Ok(Value::Struct(fields))
    }

    /// Check `value` against `#Input`.
    pub fn validate(&self, service: &ServicePath, value: &Value) -> NorthboundResult<()> {
        unify(&self.input, value)
            .map(|_| ())
            .map_err(|e| NorthboundError::invalid(format!("{service}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let kind = dir.path().join("services/foo");
        std::fs::create_dir_all(&kind).unwrap();
        std::fs::write(kind.join("metadata.json"), r#"{"keys":["bar","baz"]}"#).unwrap();
        std::fs::write(
            kind.join("transform.cue"),
            "#Input: {\n\tbar: string\n\tbaz: int\n\tintVal: int\n\tfloatVal: float\n\tstrVal: string\n}\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn converts_keys_by_declared_kind() {
        let dir = module_dir();
        let module = ServiceModule::load(dir.path(), "foo").unwrap();
        assert_eq!(module.keys(), ["bar", "baz"]);

        let sp = ServicePath::new("foo", vec!["one".into(), "2".into()]);
        let keys = module.key_values(&sp).unwrap();
        assert_eq!(keys.lookup(&["bar"]), Some(&Value::String("one".into())));
        assert_eq!(keys.lookup(&["baz"]), Some(&Value::Int(2)));

        let bad = ServicePath::new("foo", vec!["one".into(), "two".into()]);
        assert!(matches!(
            module.key_values(&bad),
            Err(NorthboundError::InvalidArgument(_))
        ));
    }

    #[test]
    fn validation_is_unification_with_input() {
        let dir = module_dir();
        let module = ServiceModule::load(dir.path(), "foo").unwrap();
        let sp = ServicePath::new("foo", vec!["one".into(), "2".into()]);
        let ok = netops_value::parse("intVal: 2\nnotDefined: \"x\"\n").unwrap();
        assert!(module.validate(&sp, &ok).is_ok());
        let bad = netops_value::parse("intVal: \"two\"\n").unwrap();
        assert!(module.validate(&sp, &bad).is_err());
    }

    #[test]
    fn unknown_kind_is_invalid() {
        let dir = module_dir();
        assert!(matches!(
            ServiceModule::load(dir.path(), "nope"),
            Err(NorthboundError::InvalidArgument(_))
        ));
    }
}
