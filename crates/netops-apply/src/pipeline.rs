//! `ServiceApply`: executes the compile and composite plans against a
//! worktree. The caller commits; nothing here touches refs.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

use netops_core::{
    COMPUTED_DIR, CUE_EXT, DevicePath, SERVICES_DIR, ServicePath, TRANSFORM_FILE,
};
use netops_git::GitRepo;
use netops_value::{
    FormatOptions, Instance, Struct, Value, ValueError, format, load_instance, unify,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ApplyError, ApplyResult};
use crate::plan::{DeviceCompositePlan, ServiceCompilePlan, preflight};

const TEMPLATE: &str = "#Template";
const TEMPLATE_INPUT: &str = "input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Written,
    Removed,
}

/// What one pipeline run did.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub services: ServiceCompilePlan,
    pub devices: Vec<(String, DeviceChange)>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.devices.is_empty()
    }
}

pub struct ServiceApply<'a> {
    repo: &'a GitRepo,
    modules: HashMap<String, Instance>,
}

impl<'a> ServiceApply<'a> {
    pub fn new(repo: &'a GitRepo) -> Self {
        Self {
            repo,
            modules: HashMap::new(),
        }
    }

    /// Run the pipeline over the staged changes in the worktree.
    ///
    /// Stops at the first failure; partially written files are left for the
    /// caller to reset.
    pub fn run(mut self) -> ApplyResult<ApplyReport> {
        let status = self.repo.status()?;
        preflight(&status)?;

        let services = ServiceCompilePlan::from_status(&status);
        for service in services.deletes() {
            self.remove_computed(service)?;
        }
        for service in services.updates() {
            self.compile(service)?;
        }

        let composite = DeviceCompositePlan::from_status(&self.repo.status()?);
        let mut devices = Vec::with_capacity(composite.devices.len());
        for device in &composite.devices {
            let change = self.compose(device)?;
            devices.push((device.clone(), change));
        }

        info!(
            services = services.entries.len(),
            devices = devices.len(),
            "service apply finished"
        );
        Ok(ApplyReport { services, devices })
    }

    fn remove_computed(&self, service: &ServicePath) -> ApplyResult<()> {
        debug!(service = %service, "removing computed outputs");
        self.repo.remove(&service.computed_dir())?;
        Ok(())
    }

    fn module(&mut self, kind: &str) -> ApplyResult<&Instance> {
        match self.modules.entry(kind.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let dir = ServicePath::kind_dir(kind);
                let instance = load_instance(&[TRANSFORM_FILE], &self.repo.abs(&dir))
                    .map_err(|err| ApplyError::value(dir, err))?;
                Ok(e.insert(instance))
            }
        }
    }

    fn compile(&mut self, service: &ServicePath) -> ApplyResult<()> {
        let input_path = service.input_file();
        let src = read(&self.repo.abs(&input_path))?;
        let input = netops_value::parse(&src).map_err(|e| ApplyError::value(&input_path, e))?;

        let output = match self
            .module(&service.kind)?
            .eval_with(TEMPLATE, TEMPLATE_INPUT, input)
        {
            Ok(output) => Some(output),
            // Schema-only modules validate inputs but target no devices.
            Err(ValueError::Unresolved(name)) if name == TEMPLATE => {
                warn!(service = %service, "module has no #Template, no device outputs");
                None
            }
            Err(e) => return Err(ApplyError::value(service.to_string(), e)),
        };
        let empty = Struct::default();
        let devices = match &output {
            Some(output) => output
                .lookup(&["output", "devices"])
                .and_then(Value::as_struct)
                .ok_or_else(|| ApplyError::MissingOutput {
                    service: service.to_string(),
                })?,
            None => &empty,
        };

        // Outputs from a previous compile must not linger for devices the
        // service no longer targets.
        self.repo.remove(&service.computed_dir())?;
        let dir = self.repo.abs(&service.computed_dir());
        std::fs::create_dir_all(&dir).map_err(|e| ApplyError::io(&dir, e))?;

        for (device, contribution) in devices.regular() {
            let path = service.computed_file(device);
            let config = contribution
                .lookup(&["config"])
                .cloned()
                .unwrap_or_else(|| Value::Struct(Default::default()));
            let text = format(&config, FormatOptions::final_())
                .map_err(|e| ApplyError::value(&path, e))?;
            write(&self.repo.abs(&path), &text)?;
            debug!(service = %service, device = %device, "wrote computed output");
        }
        self.repo.add(&service.computed_dir())?;
        info!(service = %service, devices = devices.regular().count(), "compiled service");
        Ok(())
    }

    fn compose(&self, device: &str) -> ApplyResult<DeviceChange> {
        let target = DevicePath::new(device);
        let contributions = self.contributions(device)?;

        if contributions.is_empty() {
            self.repo.remove(&target.config_file())?;
            info!(device = %device, "removed device config");
            return Ok(DeviceChange::Removed);
        }

        let mut config = Value::Struct(Default::default());
        for path in &contributions {
            let src = read(&self.repo.abs(path))?;
            let part = netops_value::parse(&src).map_err(|e| ApplyError::value(path, e))?;
            config = unify(&config, &part).map_err(|e| ApplyError::value(path, e))?;
        }
        let text = format(&config, FormatOptions::final_())
            .map_err(|e| ApplyError::value(target.config_file(), e))?;

        let abs = self.repo.abs(&target.config_file());
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApplyError::io(parent, e))?;
        }
        write(&abs, &text)?;
        self.repo.add(&target.config_file())?;
        info!(device = %device, services = contributions.len(), "composed device config");
        Ok(DeviceChange::Written)
    }

    /// Every `services/**/computed/<device>.cue` in the worktree, sorted.
    fn contributions(&self, device: &str) -> ApplyResult<Vec<String>> {
        let root = self.repo.root();
        let services = root.join(SERVICES_DIR);
        if !services.is_dir() {
            return Ok(Vec::new());
        }
        let file_name = format!("{device}{CUE_EXT}");
        let mut found = Vec::new();
        for entry in WalkDir::new(&services).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| services.clone());
                ApplyError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() || entry.file_name().to_str() != Some(file_name.as_str()) {
                continue;
            }
            let in_computed = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .is_some_and(|n| n == COMPUTED_DIR);
            if !in_computed {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                found.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(found)
    }
}

fn read(path: &Path) -> ApplyResult<String> {
    std::fs::read_to_string(path).map_err(|e| ApplyError::io(path, e))
}

fn write(path: &Path, text: &str) -> ApplyResult<()> {
    std::fs::write(path, text).map_err(|e| ApplyError::io(path, e))
}
