//! Integration tests for the `worktree` workspace against a real git
//! repository. Skipped when `git` is not on the path.

use std::path::Path;
use std::process::Command;

use agent_fleet::plugins::worktree::WorktreeWorkspace;
use agent_fleet::plugins::{Workspace, WorkspaceCreateSpec, WorkspaceRestoreSpec};

fn git(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(["-c", "user.name=fleet", "-c", "user.email=fleet@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Repository with one commit on `main`, or `None` without git.
fn init_repo(dir: &Path) -> Option<std::path::PathBuf> {
    let repo = dir.join("repo");
    std::fs::create_dir_all(&repo).expect("repo dir");
    if !git(&repo, &["init", "--quiet", "--initial-branch=main"]) {
        return None;
    }
    std::fs::write(repo.join("README.md"), "fleet\n").expect("readme");
    assert!(git(&repo, &["add", "README.md"]));
    assert!(git(&repo, &["commit", "--quiet", "-m", "init"]));
    Some(repo)
}

fn create_spec(repo: &Path, session_id: &str, branch: &str) -> WorkspaceCreateSpec {
    WorkspaceCreateSpec {
        project_id: "app".into(),
        session_id: session_id.into(),
        repo_path: repo.to_path_buf(),
        branch: branch.into(),
        base_branch: "main".into(),
    }
}

#[tokio::test]
async fn create_branches_from_base() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));

    let info = workspace
        .create(&create_spec(&repo, "app-1", "feat/app-1"))
        .await
        .expect("create");

    assert_eq!(info.path, dir.path().join("worktrees/app/app-1"));
    assert_eq!(info.branch, "feat/app-1");
    assert!(info.path.join("README.md").exists());
    assert!(workspace.exists(&info.path).await.expect("exists"));
}

#[tokio::test]
async fn create_reuses_existing_branch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    assert!(git(&repo, &["branch", "feat/existing"]));
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));

    let info = workspace
        .create(&create_spec(&repo, "app-2", "feat/existing"))
        .await
        .expect("create");

    assert!(info.path.is_dir());
}

fn head(dir: &Path) -> String {
    let out = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .expect("rev-parse");
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

#[tokio::test]
async fn default_branch_checked_out_in_main_repo_is_detached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));

    let first = workspace
        .create(&create_spec(&repo, "app-1", "main"))
        .await
        .expect("first session on main");
    let second = workspace
        .create(&create_spec(&repo, "app-2", "main"))
        .await
        .expect("second session on main");

    assert_eq!(first.branch, "main");
    assert!(first.path.join("README.md").exists());
    assert_eq!(head(&first.path), head(&repo));
    assert_eq!(head(&second.path), head(&repo));
    assert!(
        !git(&first.path, &["symbolic-ref", "-q", "HEAD"]),
        "worktree is detached"
    );

    workspace.destroy(&first.path).await.expect("destroy detached");
    assert!(!workspace.exists(&first.path).await.expect("exists"));
}

#[tokio::test]
async fn branch_held_by_another_session_is_detached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));
    let owner = workspace
        .create(&create_spec(&repo, "app-1", "feat/shared"))
        .await
        .expect("owner");

    let guest = workspace
        .create(&create_spec(&repo, "app-2", "feat/shared"))
        .await
        .expect("guest");

    assert!(git(&owner.path, &["symbolic-ref", "-q", "HEAD"]), "owner keeps the branch");
    assert_eq!(head(&guest.path), head(&owner.path));
}

#[tokio::test]
async fn destroy_removes_worktree_and_tolerates_absence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));
    let info = workspace
        .create(&create_spec(&repo, "app-1", "feat/app-1"))
        .await
        .expect("create");

    workspace.destroy(&info.path).await.expect("destroy");
    workspace.destroy(&info.path).await.expect("second destroy");

    assert!(!workspace.exists(&info.path).await.expect("exists"));
}

#[tokio::test]
async fn restore_recreates_from_surviving_branch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(repo) = init_repo(dir.path()) else {
        return;
    };
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));
    let info = workspace
        .create(&create_spec(&repo, "app-1", "feat/app-1"))
        .await
        .expect("create");
    std::fs::write(info.path.join("work.txt"), "wip\n").expect("write");
    assert!(git(&info.path, &["add", "work.txt"]));
    assert!(git(&info.path, &["commit", "--quiet", "-m", "wip"]));
    workspace.destroy(&info.path).await.expect("destroy");

    let restored = workspace
        .restore(&WorkspaceRestoreSpec {
            path: info.path.clone(),
            repo_path: repo.clone(),
            branch: "feat/app-1".into(),
        })
        .await
        .expect("restore");

    assert_eq!(restored.path, info.path);
    assert!(restored.path.join("work.txt").exists(), "branch commits survive");
}

#[tokio::test]
async fn create_outside_a_repository_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let not_repo = dir.path().join("plain");
    std::fs::create_dir_all(&not_repo).expect("dir");
    let workspace = WorktreeWorkspace::new(dir.path().join("worktrees"));

    let err = workspace
        .create(&create_spec(&not_repo, "app-1", "feat/app-1"))
        .await
        .expect_err("not a repo");

    assert!(err.to_string().starts_with("workspace: "));
}
