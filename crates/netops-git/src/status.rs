//! Per-file status codes.

use std::fmt;

/// Status of one side (index or worktree) of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Unmodified,
    Untracked,
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    UpdatedButUnmerged,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Unmodified => "unmodified",
            StatusCode::Untracked => "untracked",
            StatusCode::Modified => "modified",
            StatusCode::Added => "added",
            StatusCode::Deleted => "deleted",
            StatusCode::Renamed => "renamed",
            StatusCode::Copied => "copied",
            StatusCode::UpdatedButUnmerged => "unmerged",
        };
        f.write_str(s)
    }
}

/// Status of a file in the index (`staging`) and in the worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub staging: StatusCode,
    pub worktree: StatusCode,
}

impl FileStatus {
    pub(crate) fn from_git(status: git2::Status) -> Self {
        use git2::Status as S;
        if status.contains(S::CONFLICTED) {
            return Self {
                staging: StatusCode::UpdatedButUnmerged,
                worktree: StatusCode::UpdatedButUnmerged,
            };
        }
        if status.contains(S::WT_NEW) && !status.intersects(S::INDEX_NEW | S::INDEX_MODIFIED) {
            return Self {
                staging: StatusCode::Untracked,
                worktree: StatusCode::Untracked,
            };
        }
        let staging = if status.contains(S::INDEX_NEW) {
            StatusCode::Added
        } else if status.contains(S::INDEX_DELETED) {
            StatusCode::Deleted
        } else if status.contains(S::INDEX_RENAMED) {
            StatusCode::Renamed
        } else if status.intersects(S::INDEX_MODIFIED | S::INDEX_TYPECHANGE) {
            StatusCode::Modified
        } else {
            StatusCode::Unmodified
        };
        let worktree = if status.contains(S::WT_DELETED) {
            StatusCode::Deleted
        } else if status.contains(S::WT_RENAMED) {
            StatusCode::Renamed
        } else if status.intersects(S::WT_MODIFIED | S::WT_TYPECHANGE) {
            StatusCode::Modified
        } else {
            StatusCode::Unmodified
        };
        Self { staging, worktree }
    }
}

/// A tracked file with a change on this side.
pub fn is_tracked_and_changed(code: StatusCode) -> bool {
    !matches!(code, StatusCode::Unmodified | StatusCode::Untracked)
}

/// A tracked file changed both in the index and in the worktree.
pub fn is_both_worktree_and_staging_tracked_and_changed(fs: &FileStatus) -> bool {
    is_tracked_and_changed(fs.staging) && is_tracked_and_changed(fs.worktree)
}
