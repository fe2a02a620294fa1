//! Git plumbing for the OTA update service
//!
//! Thin wrappers over libgit2 for the handful of operations the update
//! cycle needs: locate the install repository, fetch the tracked branch,
//! compare local and remote heads, and fast-forward.

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::Repository;

use super::UpdateError;

/// How many directory levels above the install dir to search for a
/// repository marker.
const REPO_SEARCH_DEPTH: usize = 5;

/// The tip of the remote tracking branch.
#[derive(Debug, Clone)]
pub struct RemoteTip {
    /// Short (7-char) commit id
    pub short_id: String,
    /// First line of the commit message
    pub subject: String,
    /// Commit timestamp, human-readable
    pub timestamp: String,
}

/// Walk upward from `start` (bounded) looking for a `.git` directory.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    for _ in 0..REPO_SEARCH_DEPTH {
        if dir.join(".git").is_dir() {
            return Some(dir);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Fetch `branch` from `origin`, updating the remote tracking ref.
pub fn fetch_branch(root: &Path, branch: &str) -> Result<(), UpdateError> {
    let repo = Repository::open(root)?;
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[branch], None, None)?;
    Ok(())
}

/// Short id of the local HEAD commit.
pub fn local_head(root: &Path) -> Result<String, UpdateError> {
    let repo = Repository::open(root)?;
    let head = repo.head()?.peel_to_commit()?;
    Ok(short_id(&head.id()))
}

/// Tip of `origin/<branch>` after a fetch.
pub fn remote_tip(root: &Path, branch: &str) -> Result<RemoteTip, UpdateError> {
    let repo = Repository::open(root)?;
    let reference = repo.find_reference(&remote_ref(branch))?;
    let commit = reference.peel_to_commit()?;

    let subject = commit.summary().unwrap_or("").to_string();
    let timestamp = chrono::DateTime::from_timestamp(commit.time().seconds(), 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(RemoteTip {
        short_id: short_id(&commit.id()),
        subject,
        timestamp,
    })
}

/// Number of commits `origin/<branch>` is ahead of the local HEAD, the
/// revision delta that signals an update is available.
pub fn commits_behind(root: &Path, branch: &str) -> Result<usize, UpdateError> {
    let repo = Repository::open(root)?;
    let local = repo.head()?.peel_to_commit()?.id();
    let remote = repo.find_reference(&remote_ref(branch))?.peel_to_commit()?.id();
    let (_ahead, behind) = repo.graph_ahead_behind(local, remote)?;
    Ok(behind)
}

/// Fast-forward the local branch to the fetched remote tip and check out
/// the result. Refuses diverged histories: a dirty install is an operator
/// problem, not something to merge on the road.
pub fn fast_forward(root: &Path, branch: &str) -> Result<String, UpdateError> {
    let repo = Repository::open(root)?;
    let target = repo
        .find_reference(&remote_ref(branch))?
        .target()
        .ok_or_else(|| UpdateError::Git(git2::Error::from_str("remote ref has no target")))?;

    let annotated = repo.find_annotated_commit(target)?;
    let (analysis, _) = repo.merge_analysis(&[&annotated])?;

    if analysis.is_up_to_date() {
        return Ok(short_id(&target));
    }
    if !analysis.is_fast_forward() {
        return Err(UpdateError::Diverged);
    }

    let local_ref = format!("refs/heads/{branch}");
    repo.find_reference(&local_ref)?
        .set_target(target, "ota: fast-forward")?;
    repo.set_head(&local_ref)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;

    Ok(short_id(&target))
}

fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{branch}")
}

fn short_id(oid: &git2::Oid) -> String {
    let full = oid.to_string();
    full.chars().take(7).collect()
}

/// Git fixture helpers shared by the update service tests.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub(crate) fn commit_file(
        repo: &Repository,
        name: &str,
        contents: &str,
        message: &str,
    ) -> git2::Oid {
        let workdir = repo.workdir().expect("test repo has a workdir");
        fs::write(workdir.join(name), contents).expect("write fixture file");

        let mut index = repo.index().expect("repo index");
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .expect("index add");
        index.write().expect("index write");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");

        let sig = git2::Signature::now("Fixture", "fixture@example.com").expect("signature");
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .expect("commit")
    }

    /// Build an "origin" repo with one commit and a clone of it.
    pub(crate) fn fixture() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let origin_path = dir.path().join("origin");
        let clone_path = dir.path().join("clone");

        let origin = Repository::init(&origin_path).expect("init origin");
        commit_file(&origin, "app.txt", "v1", "Initial release");

        Repository::clone(origin_path.to_string_lossy().as_ref(), &clone_path)
            .expect("clone fixture");

        (dir, origin_path, clone_path)
    }

    pub(crate) fn default_branch(path: &Path) -> String {
        let repo = Repository::open(path).expect("open repo");
        let head = repo.head().expect("head");
        head.shorthand().expect("branch name").to_string()
    }
}
