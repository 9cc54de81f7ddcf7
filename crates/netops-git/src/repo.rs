//! `GitRepo`: a worktree plus its `origin` remote.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, ErrorCode, FetchOptions, FetchPrune, IndexAddOption, ObjectType,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, StatusOptions,
    TreeWalkMode, TreeWalkResult,
};
use tracing::{debug, info, warn};

use crate::error::{GitError, GitResult};
use crate::status::{FileStatus, StatusCode};

const ORIGIN: &str = "origin";

/// How to open (or clone) a repository.
#[derive(Debug, Clone)]
pub struct RepoOptions {
    /// Local worktree path.
    pub path: PathBuf,
    /// Remote URL; used for cloning and as `origin`.
    pub url: Option<String>,
    pub clone_if_not_exists: bool,
    /// `user:pass`, or a bare token used as the password for user `git`.
    pub token: Option<String>,
    pub author_name: String,
    pub author_email: String,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            url: None,
            clone_if_not_exists: false,
            token: None,
            author_name: "netops".to_string(),
            author_email: "netops@localhost".to_string(),
        }
    }
}

/// The commit HEAD points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub id: String,
    pub branch: Option<String>,
    /// Author time, seconds since the epoch.
    pub time: i64,
}

impl Head {
    pub fn time_nanos(&self) -> i64 {
        self.time.saturating_mul(1_000_000_000)
    }
}

pub struct GitRepo {
    repo: Repository,
    root: PathBuf,
    opts: RepoOptions,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo").field("root", &self.root).finish()
    }
}

fn credentials<'a>(token: Option<String>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let attempts = Cell::new(0u8);
    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > 1 {
            return Err(git2::Error::from_str("authentication failed"));
        }
        match &token {
            Some(token) if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) => {
                let (user, pass) = match token.split_once(':') {
                    Some((user, pass)) => (user, pass),
                    None => (username_from_url.unwrap_or("git"), token.as_str()),
                };
                Cred::userpass_plaintext(user, pass)
            }
            _ => Cred::default(),
        }
    });
    callbacks
}

impl GitRepo {
    /// Open the repository at `opts.path`, cloning it first when missing
    /// and `clone_if_not_exists` is set.
    pub fn open(opts: RepoOptions) -> GitResult<Self> {
        let repo = match Repository::open(&opts.path) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                let url = match (&opts.url, opts.clone_if_not_exists) {
                    (Some(url), true) => url,
                    _ => return Err(GitError::NotFound(opts.path.clone())),
                };
                info!(url = %url, path = %opts.path.display(), "cloning repository");
                let mut fetch = FetchOptions::new();
                fetch.remote_callbacks(credentials(opts.token.clone()));
                let mut builder = RepoBuilder::new();
                builder.fetch_options(fetch);
                builder.clone(url, &opts.path)?
            }
            Err(e) => return Err(e.into()),
        };
        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::InvalidPath(opts.path.display().to_string()))?;
        Ok(Self { repo, root, opts })
    }

    /// Absolute path of a repo-relative path.
    pub fn abs(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_origin(&self) -> bool {
        self.repo.find_remote(ORIGIN).is_ok()
    }

    fn is_unborn(&self) -> bool {
        matches!(self.repo.head(), Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound)
    }

    // ── Inspection ─────────────────────────────────────────────

    /// HEAD commit, or `None` for a repository without commits.
    pub fn head(&self) -> GitResult<Option<Head>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(Head {
            id: commit.id().to_string(),
            branch: head.shorthand().map(str::to_string).filter(|_| head.is_branch()),
            time: commit.author().when().seconds(),
        }))
    }

    /// Commit id a rev-spec points to, or `None` when it does not resolve
    /// (an unborn branch, for instance).
    pub fn resolve(&self, revision: &str) -> GitResult<Option<String>> {
        match self.repo.revparse_single(revision) {
            Ok(obj) => Ok(Some(obj.peel_to_commit()?.id().to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Name of the branch HEAD points to, born or not.
    pub fn current_branch(&self) -> GitResult<Option<String>> {
        let head = self.repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|t| t.strip_prefix("refs/heads/"))
            .map(str::to_string))
    }

    pub fn status(&self) -> GitResult<BTreeMap<String, FileStatus>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut out = BTreeMap::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let fs = FileStatus::from_git(entry.status());
            if fs.staging == StatusCode::Unmodified && fs.worktree == StatusCode::Unmodified {
                continue;
            }
            out.insert(path.to_string(), fs);
        }
        Ok(out)
    }

    /// Contents of `path` at `revision` (any rev-spec: hash, branch, `HEAD`).
    pub fn read_file_at(&self, revision: &str, path: &str) -> GitResult<Vec<u8>> {
        let tree = self.repo.revparse_single(revision)?.peel_to_commit()?.tree()?;
        let entry = tree.get_path(Path::new(path))?;
        let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
        Ok(blob.content().to_vec())
    }

    /// Files under `prefix` at `revision`, repo-relative.
    pub fn list_files_at(&self, revision: &str, prefix: &str) -> GitResult<Vec<String>> {
        let tree = self.repo.revparse_single(revision)?.peel_to_commit()?.tree()?;
        let prefix = prefix.trim_end_matches('/');
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let path = format!("{root}{name}");
                    if prefix.is_empty() || path.starts_with(&format!("{prefix}/")) {
                        files.push(path);
                    }
                }
            }
            TreeWalkResult::Ok
        })?;
        files.sort();
        Ok(files)
    }

    // ── Branches ───────────────────────────────────────────────

    /// Switch to `branch`, creating it from HEAD when `create` is set.
    ///
    /// In a repository without commits HEAD is simply pointed at the
    /// (unborn) branch.
    pub fn checkout(&self, branch: &str, create: bool) -> GitResult<()> {
        let refname = format!("refs/heads/{branch}");
        if self.is_unborn() {
            self.repo.set_head(&refname)?;
            return Ok(());
        }
        let target = match self.repo.find_branch(branch, BranchType::Local) {
            Ok(local) => local.get().peel_to_commit()?,
            Err(_) => {
                let start = if create {
                    self.repo.head()?.peel_to_commit()?
                } else {
                    let remote = format!("refs/remotes/{ORIGIN}/{branch}");
                    match self.repo.find_reference(&remote) {
                        Ok(r) => r.peel_to_commit()?,
                        Err(_) => return Err(GitError::BranchNotFound(branch.to_string())),
                    }
                };
                let mut local = self.repo.branch(branch, &start, false)?;
                if !create {
                    local.set_upstream(Some(format!("{ORIGIN}/{branch}").as_str()))?;
                }
                debug!(branch, "created branch");
                start
            }
        };
        self.checkout_commit(&target)?;
        self.repo.set_head(&refname)?;
        Ok(())
    }

    /// Move the worktree and index from HEAD's tree to `commit`'s tree,
    /// keeping unrelated local changes.
    fn checkout_commit(&self, commit: &git2::Commit<'_>) -> GitResult<()> {
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
        Ok(())
    }

    pub fn branches(&self) -> GitResult<Vec<String>> {
        let mut names = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove_branch(&self, name: &str) -> GitResult<()> {
        let mut branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| GitError::BranchNotFound(name.to_string()))?;
        branch.delete()?;
        Ok(())
    }

    pub fn remote(&self, name: &str) -> RemoteHandle<'_> {
        RemoteHandle {
            repo: self,
            name: name.to_string(),
        }
    }

    /// Delete local branches whose upstream branch no longer exists.
    pub fn remove_gone_branches(&self) -> GitResult<Vec<String>> {
        let current = self.current_branch()?;
        let mut removed = Vec::new();
        for name in self.branches()? {
            if current.as_deref() == Some(name.as_str()) {
                continue;
            }
            let Ok(upstream) = self.repo.branch_upstream_name(&format!("refs/heads/{name}")) else {
                continue;
            };
            let Some(upstream) = upstream.as_str() else {
                continue;
            };
            if self.repo.find_reference(upstream).is_err() {
                self.remove_branch(&name)?;
                info!(branch = %name, "removed branch whose upstream is gone");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    // ── Remote sync ────────────────────────────────────────────

    fn fetch(&self) -> GitResult<()> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let mut fetch = FetchOptions::new();
        fetch
            .remote_callbacks(credentials(self.opts.token.clone()))
            .prune(FetchPrune::On);
        let refspec = format!("+refs/heads/*:refs/remotes/{ORIGIN}/*");
        remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;
        Ok(())
    }

    /// Fetch and fast-forward `branch`. An up-to-date branch, an empty
    /// remote, or a repository without `origin` are all successes.
    pub fn pull(&self, branch: &str) -> GitResult<()> {
        if !self.has_origin() {
            return Ok(());
        }
        self.fetch()?;
        let remote_ref = match self
            .repo
            .find_reference(&format!("refs/remotes/{ORIGIN}/{branch}"))
        {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(branch, "remote branch does not exist yet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let target = remote_ref.peel_to_commit()?;
        let is_current = self.current_branch()?.as_deref() == Some(branch);
        let local_name = format!("refs/heads/{branch}");

        let mut local = match self.repo.find_reference(&local_name) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => {
                if is_current {
                    self.checkout_commit(&target)?;
                }
                self.repo
                    .reference(&local_name, target.id(), false, "pull: create branch")?;
                debug!(branch, commit = %target.id(), "created branch from remote");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let annotated = self.repo.reference_to_annotated_commit(&remote_ref)?;
        let (analysis, _) = self
            .repo
            .merge_analysis_for_ref(&local, &[&annotated])?;
        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(GitError::NonFastForward(branch.to_string()));
        }
        if is_current {
            self.checkout_commit(&target)?;
        }
        local.set_target(target.id(), "pull: fast-forward")?;
        debug!(branch, commit = %target.id(), "fast-forwarded");
        Ok(())
    }

    pub fn push(&self, branch: &str) -> GitResult<()> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        self.push_refspec(ORIGIN, &refspec)?;
        if let Ok(mut local) = self.repo.find_branch(branch, BranchType::Local) {
            if let Err(e) = local.set_upstream(Some(format!("{ORIGIN}/{branch}").as_str())) {
                debug!(branch, error = %e, "could not set upstream");
            }
        }
        info!(branch, "pushed");
        Ok(())
    }

    fn push_refspec(&self, remote: &str, refspec: &str) -> GitResult<()> {
        let mut remote = self.repo.find_remote(remote)?;
        let rejected: std::cell::RefCell<Option<(String, String)>> = Default::default();
        {
            let mut callbacks = credentials(self.opts.token.clone());
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    *rejected.borrow_mut() = Some((reference.to_string(), message.to_string()));
                }
                Ok(())
            });
            let mut push = PushOptions::new();
            push.remote_callbacks(callbacks);
            remote.push(&[refspec], Some(&mut push))?;
        }
        match rejected.into_inner() {
            Some((reference, message)) => Err(GitError::PushRejected { reference, message }),
            None => Ok(()),
        }
    }

    // ── Index and worktree ─────────────────────────────────────

    fn check_path(path: &str) -> GitResult<()> {
        if path.starts_with('/') || path.split('/').any(|p| p == "..") {
            return Err(GitError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    /// Stage additions, modifications and deletions under `path`.
    pub fn add(&self, path: &str) -> GitResult<()> {
        Self::check_path(path)?;
        let spec = if path.is_empty() || path == "." { "*" } else { path };
        let mut index = self.repo.index()?;
        index.add_all([spec], IndexAddOption::DEFAULT, None)?;
        index.update_all([spec], None)?;
        index.write()?;
        Ok(())
    }

    /// Remove `path` (file or directory) from the worktree and the index.
    pub fn remove(&self, path: &str) -> GitResult<()> {
        Self::check_path(path)?;
        let abs = self.abs(path);
        if abs.is_dir() {
            std::fs::remove_dir_all(&abs).map_err(|e| GitError::io(&abs, e))?;
        } else if abs.exists() {
            std::fs::remove_file(&abs).map_err(|e| GitError::io(&abs, e))?;
        }
        let mut index = self.repo.index()?;
        index.remove_all([path], None)?;
        index.write()?;
        Ok(())
    }

    /// Commit the index and return the new commit id.
    pub fn commit(&self, message: &str) -> GitResult<String> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now(&self.opts.author_name, &self.opts.author_email)?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                None
            }
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(commit = %id, "committed");
        Ok(id.to_string())
    }

    /// Reset the index to HEAD. A hard reset also restores the worktree
    /// and deletes untracked files, leaving `status()` empty.
    pub fn reset(&self, hard: bool) -> GitResult<()> {
        match self.repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit()?;
                let kind = if hard { ResetType::Hard } else { ResetType::Mixed };
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                self.repo
                    .reset(commit.as_object(), kind, Some(&mut checkout))?;
            }
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
            Err(e) => return Err(e.into()),
        }
        if hard {
            self.remove_untracked()?;
        }
        Ok(())
    }

    fn remove_untracked(&self) -> GitResult<()> {
        for (path, fs) in self.status()? {
            if fs.worktree != StatusCode::Untracked {
                continue;
            }
            let abs = self.abs(&path);
            if let Err(e) = std::fs::remove_file(&abs) {
                warn!(path = %abs.display(), error = %e, "failed to remove untracked file");
                continue;
            }
            let mut dir = abs.parent();
            while let Some(d) = dir {
                if d == self.root || std::fs::remove_dir(d).is_err() {
                    break;
                }
                dir = d.parent();
            }
        }
        Ok(())
    }
}

/// A named remote of a [`GitRepo`].
pub struct RemoteHandle<'a> {
    repo: &'a GitRepo,
    name: String,
}

impl RemoteHandle<'_> {
    /// Remote branches as last fetched.
    pub fn branches(&self) -> GitResult<Vec<String>> {
        let prefix = format!("{}/", self.name);
        let mut names = Vec::new();
        for branch in self.repo.repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()?.and_then(|n| n.strip_prefix(&prefix)) {
                if name != "HEAD" {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete `branch` on the remote and its remote-tracking ref.
    pub fn remove_branch(&self, branch: &str) -> GitResult<()> {
        self.repo
            .push_refspec(&self.name, &format!(":refs/heads/{branch}"))?;
        if let Ok(mut tracking) = self
            .repo
            .repo
            .find_branch(&format!("{}/{branch}", self.name), BranchType::Remote)
        {
            tracking.delete()?;
        }
        info!(remote = %self.name, branch, "removed remote branch");
        Ok(())
    }
}
