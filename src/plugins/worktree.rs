//! Built-in `worktree` workspace: one `git worktree` per session.
//!
//! Worktrees live under `<root>/<project_id>/<session_id>` and share the
//! object store of the project's local checkout.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{PluginFuture, Workspace, WorkspaceCreateSpec, WorkspaceInfo, WorkspaceRestoreSpec};
use crate::{AppError, Result};

/// Registry name.
pub const NAME: &str = "worktree";

/// `git worktree` backed workspaces.
pub struct WorktreeWorkspace {
    root: PathBuf,
}

impl WorktreeWorkspace {
    /// Workspaces are created below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the worktree for a session lives.
    #[must_use]
    pub fn path_for(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.root.join(project_id).join(session_id)
    }

    async fn add(&self, spec: &WorkspaceCreateSpec) -> Result<WorkspaceInfo> {
        let path = self.path_for(&spec.project_id, &spec.session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AppError::Workspace(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        let target = path_arg(&path)?;
        if local_branch_exists(&spec.repo_path, &spec.branch).await? {
            add_existing(&spec.repo_path, target, &spec.branch).await?;
        } else {
            git_checked(
                &spec.repo_path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &spec.branch,
                    target,
                    &spec.base_branch,
                ],
            )
            .await?;
        }

        info!(
            session_id = spec.session_id,
            branch = spec.branch,
            path = %path.display(),
            "worktree created"
        );
        Ok(WorkspaceInfo {
            path,
            branch: spec.branch.clone(),
        })
    }

    async fn remove(path: &Path) -> Result<()> {
        if !dir_exists(path).await? {
            debug!(path = %path.display(), "worktree already gone");
            return Ok(());
        }

        let target = path_arg(path)?;
        let common = git_checked(
            path,
            &["rev-parse", "--path-format=absolute", "--git-common-dir"],
        )
        .await?;
        let common_dir = PathBuf::from(String::from_utf8_lossy(&common.stdout).trim());
        let repo = common_dir
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AppError::Workspace(format!("no repository for {target}")))?;

        if let Err(err) = git_checked(&repo, &["worktree", "remove", "--force", target]).await {
            warn!(%err, path = target, "git worktree remove failed, deleting directory");
            tokio::fs::remove_dir_all(path).await.map_err(|err| {
                AppError::Workspace(format!("failed to delete {target}: {err}"))
            })?;
            git(&repo, &["worktree", "prune"]).await?;
        }

        info!(path = target, "worktree removed");
        Ok(())
    }

    async fn recreate(spec: &WorkspaceRestoreSpec) -> Result<WorkspaceInfo> {
        if let Some(parent) = spec.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AppError::Workspace(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        // A stale registration blocks `worktree add` for the same path.
        git(&spec.repo_path, &["worktree", "prune"]).await?;
        let fetch = git(&spec.repo_path, &["fetch", "origin", &spec.branch]).await?;
        if !fetch.status.success() {
            debug!(branch = spec.branch, "fetch failed, using local branch only");
        }

        let target = path_arg(&spec.path)?;
        if local_branch_exists(&spec.repo_path, &spec.branch).await? {
            add_existing(&spec.repo_path, target, &spec.branch).await?;
        } else {
            let remote = format!("origin/{}", spec.branch);
            git_checked(
                &spec.repo_path,
                &["worktree", "add", "-b", &spec.branch, target, &remote],
            )
            .await?;
        }

        info!(branch = spec.branch, path = target, "worktree restored");
        Ok(WorkspaceInfo {
            path: spec.path.clone(),
            branch: spec.branch.clone(),
        })
    }
}

impl Workspace for WorktreeWorkspace {
    fn name(&self) -> &str {
        NAME
    }

    fn create<'a>(&'a self, spec: &'a WorkspaceCreateSpec) -> PluginFuture<'a, WorkspaceInfo> {
        Box::pin(self.add(spec))
    }

    fn destroy<'a>(&'a self, path: &'a Path) -> PluginFuture<'a, ()> {
        Box::pin(Self::remove(path))
    }

    fn exists<'a>(&'a self, path: &'a Path) -> PluginFuture<'a, bool> {
        Box::pin(dir_exists(path))
    }

    fn restore<'a>(&'a self, spec: &'a WorkspaceRestoreSpec) -> PluginFuture<'a, WorkspaceInfo> {
        Box::pin(Self::recreate(spec))
    }
}

async fn dir_exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::Workspace(format!(
            "failed to stat {}: {err}",
            path.display()
        ))),
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        AppError::Workspace(format!("path is not valid UTF-8: {}", path.display()))
    })
}

async fn local_branch_exists(repo: &Path, branch: &str) -> Result<bool> {
    let output = git(
        repo,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    )
    .await?;
    Ok(output.status.success())
}

/// Add a worktree for an existing local branch. A branch that is already
/// checked out (the main checkout's default branch, or another session on
/// the same branch) is added detached at its tip, since git refuses a
/// second checkout of one branch.
async fn add_existing(repo: &Path, target: &str, branch: &str) -> Result<()> {
    if checked_out(repo, branch).await? {
        debug!(branch, path = target, "branch checked out elsewhere, detaching");
        git_checked(repo, &["worktree", "add", "--detach", target, branch]).await?;
    } else {
        git_checked(repo, &["worktree", "add", target, branch]).await?;
    }
    Ok(())
}

/// Whether any worktree of `repo`, the main checkout included, has `branch`
/// checked out.
async fn checked_out(repo: &Path, branch: &str) -> Result<bool> {
    let output = git_checked(repo, &["worktree", "list", "--porcelain"]).await?;
    let wanted = format!("branch refs/heads/{branch}");
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.trim_end() == wanted))
}

async fn git(dir: &Path, args: &[&str]) -> Result<Output> {
    debug!(args = ?args, dir = %dir.display(), "running git");
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|err| AppError::Workspace(format!("failed to run git: {err}")))
}

async fn git_checked(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = git(dir, args).await?;
    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AppError::Workspace(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )))
    }
}
