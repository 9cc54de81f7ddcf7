//! The Set transaction against the config worktree.
//!
//! Runs on a blocking thread with `mu` held for writing and `smu`
//! locked. Sub-operations run in request order: deletes, replaces,
//! updates. Then everything under `services/` is staged, the service
//! pipeline runs, and the result is committed and pushed.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use netops_apply::ServiceApply;
use netops_core::{SERVICES_DIR, ServicePath, epoch_nanos, epoch_secs};
use netops_git::{CommitMessage, GitRepo, is_tracked_and_changed};
use netops_proto::update_result::Operation;
use netops_proto::{Path, SetRequest, SetResponse, Update, UpdateResult};
use netops_value::{FormatOptions, Value, build_expr, format, merge};
use tracing::{debug, info, warn};

use crate::error::{NorthboundError, NorthboundResult};
use crate::module::ServiceModule;
use crate::path::{PathReq, service_path};

/// How Set lands its changes.
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub trunk: String,
    /// Commit each Set on a fresh `REV-<unix>` branch instead of trunk.
    pub branch_per_commit: bool,
    /// Leave the worktree as the transaction left it.
    pub persist_git_state: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            trunk: netops_core::DEFAULT_TRUNK.to_string(),
            branch_per_commit: false,
            persist_git_state: false,
        }
    }
}

/// Run one Set request. Unless `persist_git_state` is set the worktree
/// is reset to trunk afterwards, whatever the outcome.
pub fn run(repo: &GitRepo, opts: &SetOptions, req: &SetRequest) -> NorthboundResult<SetResponse> {
    let result = Transaction::new(repo, opts).run(req);
    if !opts.persist_git_state {
        if let Err(e) = repo.reset(true) {
            warn!(error = %e, "failed to reset config worktree");
        }
        if let Err(e) = repo.checkout(&opts.trunk, false) {
            warn!(error = %e, trunk = %opts.trunk, "failed to check out trunk");
        }
    }
    result
}

struct Transaction<'a> {
    repo: &'a GitRepo,
    opts: &'a SetOptions,
    modules: HashMap<String, ServiceModule>,
}

impl<'a> Transaction<'a> {
    fn new(repo: &'a GitRepo, opts: &'a SetOptions) -> Self {
        Self {
            repo,
            opts,
            modules: HashMap::new(),
        }
    }

    fn run(mut self, req: &SetRequest) -> NorthboundResult<SetResponse> {
        self.repo.reset(true)?;
        self.repo.checkout(&self.opts.trunk, false)?;
        self.repo.pull(&self.opts.trunk)?;

        let prefix = req.prefix.as_ref();
        let mut response = Vec::new();
        for path in &req.delete {
            let (service, _) = self.resolve(prefix, Some(path))?;
            self.delete(&service)?;
            response.push(UpdateResult::new(path.clone(), Operation::Delete));
        }
        for update in &req.replace {
            self.write(prefix, update, false)?;
            response.push(UpdateResult::new(
                update.path.clone().unwrap_or_default(),
                Operation::Replace,
            ));
        }
        for update in &req.update {
            self.write(prefix, update, true)?;
            response.push(UpdateResult::new(
                update.path.clone().unwrap_or_default(),
                Operation::Update,
            ));
        }

        self.repo.add(SERVICES_DIR)?;
        ServiceApply::new(self.repo).run()?;
        self.commit()?;

        Ok(SetResponse {
            prefix: req.prefix.clone(),
            response,
            timestamp: epoch_nanos(),
        })
    }

    fn module(&mut self, kind: &str) -> NorthboundResult<&ServiceModule> {
        match self.modules.entry(kind.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(ServiceModule::load(self.repo.root(), kind)?)),
        }
    }

    fn resolve(
        &mut self,
        prefix: Option<&Path>,
        path: Option<&Path>,
    ) -> NorthboundResult<(ServicePath, ServiceModule)> {
        match PathReq::parse(&Path::joined(prefix, path))? {
            PathReq::Service { kind, keys } => {
                let module = self.module(&kind)?.clone();
                let service = service_path(&kind, &keys, module.keys())?;
                Ok((service, module))
            }
            PathReq::Device(device) => Err(NorthboundError::invalid(format!(
                "device {device} is read-only"
            ))),
        }
    }

    fn delete(&self, service: &ServicePath) -> NorthboundResult<()> {
        // Deleting an absent input is a no-op.
        self.repo.remove(&service.input_file())?;
        debug!(service = %service, "deleted service input");
        Ok(())
    }

    fn write(&mut self, prefix: Option<&Path>, update: &Update, merge_current: bool) -> NorthboundResult<()> {
        let (service, module) = self.resolve(prefix, update.path.as_ref())?;
        let body = decode_body(&service, update)?;
        let keys = module.key_values(&service)?;

        let input_path = service.input_file();
        let abs = self.repo.abs(&input_path);
        let current = if merge_current {
            let src = match std::fs::read_to_string(&abs) {
                Ok(src) => src,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(NorthboundError::NotFound(service.to_string()));
                }
                Err(e) => return Err(NorthboundError::io(&input_path, e)),
            };
            netops_value::parse(&src).map_err(|e| NorthboundError::value(&input_path, e))?
        } else {
            Value::Struct(Default::default())
        };

        let value = merge(&merge(&current, &body), &keys);
        module.validate(&service, &value)?;
        let text = format(&value, FormatOptions::default())
            .map_err(|e| NorthboundError::value(&input_path, e))?;

        if let Some(dir) = abs.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| NorthboundError::io(dir.display().to_string(), e))?;
        }
        std::fs::write(&abs, text).map_err(|e| NorthboundError::io(&input_path, e))?;
        debug!(service = %service, merged = merge_current, "wrote service input");
        Ok(())
    }

    fn commit(&self) -> NorthboundResult<()> {
        let status = self.repo.status()?;
        if !status.values().any(|fs| is_tracked_and_changed(fs.staging)) {
            info!("set produced no changes, nothing to commit");
            return Ok(());
        }
        let message = CommitMessage::from_status(&status);

        let branch = if self.opts.branch_per_commit {
            let branch = format!("REV-{}", epoch_secs());
            self.repo.checkout(&branch, true)?;
            branch
        } else {
            self.opts.trunk.clone()
        };
        let id = self.repo.commit(&message.render())?;
        info!(commit = %id, branch = %branch, "committed config change");

        if self.repo.has_origin() {
            self.repo.push(&branch)?;
        }
        Ok(())
    }
}

fn decode_body(service: &ServicePath, update: &Update) -> NorthboundResult<Value> {
    let bytes = update
        .val
        .as_ref()
        .and_then(|v| v.json_bytes())
        .ok_or_else(|| NorthboundError::invalid(format!("{service}: value must be JSON")))?;
    let json: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| NorthboundError::invalid(format!("{service}: malformed JSON: {e}")))?;
    if !json.is_object() {
        return Err(NorthboundError::invalid(format!(
            "{service}: value must be a JSON object"
        )));
    }
    build_expr(&json).map_err(|e| NorthboundError::invalid(format!("{service}: {e}")))
}
