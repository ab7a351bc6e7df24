use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{anyhow, bail, Context as _, Result};
use itertools::Itertools as _;

pub fn git_top_level() -> Result<PathBuf> {
    git_top_level_in(Path::new("."))
}

fn git_top_level_in(dir: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .context("Failed to run git rev-parse --show-toplevel")?;
    if !output.status.success() {
        // Most commonly we just aren't inside a repository.
        bail!(
            "git rev-parse command failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let path = std::str::from_utf8(&output.stdout)
        .with_context(|| anyhow!("Path is not UTF-8: {:?}", output.stdout))?;
    Ok(PathBuf::from(path.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory.
    Tree,
    Symlink,
    /// Marked as executable in Git. This is possible on Windows too.
    ExecutableFile,
    /// Not marked as executable in Git.
    File,
    /// A gitlink, i.e. a submodule.
    Submodule,
}

/// One entry of a tree (or index) listing. The name is the path relative to
/// the top level, `/`-separated, and is kept as raw bytes: Git does not
/// require names to be UTF-8, and checking the ones that aren't is the whole
/// point of this tool.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: Vec<u8>,
    pub kind: EntryKind,
}

/// Get all of the entries in a tree (i.e. a commit). This doesn't work
/// for the index or working directory.
pub fn git_tree_entries(top_level: &Path, treeish: &str) -> Result<Vec<TreeEntry>> {
    let command = Command::new("git")
        .arg("ls-tree")
        // Recursive, but also list each tree itself, not just its contents.
        // Clash checking needs every directory to appear as an entry in its
        // own right.
        .arg("-r")
        .arg("-t")
        // Null terminated lines.
        .arg("-z")
        // Show all files (not just in the CWD), and show paths relative to
        // the top level (instead of the CWD). Doesn't really matter since
        // we set the CWD to the top level, but belt and braces.
        .arg("--full-tree")
        .arg("--format=%(objectmode)%x00%(objectname)%x00%(objectsize)%x00%(path)")
        .arg(treeish)
        // Set the working directory to the root anyway just in case.
        .current_dir(top_level)
        .output()
        .context("Failed to run git ls-tree")?;

    if !command.status.success() {
        bail!(
            "git ls-tree command failed: {}",
            String::from_utf8_lossy(&command.stderr).trim()
        );
    }

    Ok(parse_listing(&command.stdout))
}

/// Get all of the staged entries. The index is flat so there are no tree
/// entries in it, but parent directories still get clash-checked amongst
/// their children via the dirnames.
pub fn git_staged_entries(top_level: &Path) -> Result<Vec<TreeEntry>> {
    let command = Command::new("git")
        .arg("ls-files")
        // Show staged files (technically the default option but let's be explicit).
        .arg("--cached")
        // Null terminated lines.
        .arg("-z")
        // Show paths relative to top level.
        .arg("--full-name")
        // ls-files has no %(objectsize) atom until git 2.42; %(stage) keeps
        // the record shape identical to the ls-tree one so the decoder can
        // be shared.
        .arg("--format=%(objectmode)%x00%(objectname)%x00%(stage)%x00%(path)")
        .current_dir(top_level)
        .output()
        .context("Failed to run git ls-files")?;

    if !command.status.success() {
        bail!(
            "git ls-files command failed: {}",
            String::from_utf8_lossy(&command.stderr).trim()
        );
    }

    Ok(parse_listing(&command.stdout))
}

/// Decode the NUL-separated records produced by the `--format` string above.
/// The path bytes are taken as-is, never decoded as text.
fn parse_listing(stdout: &[u8]) -> Vec<TreeEntry> {
    stdout
        .split(|&b| b == 0)
        .tuples()
        .map(|(mode, _hash, _extra, path)| {
            // mode:   octal permission bits, e.g. 100644.
            // _hash:  object hash
            // _extra: size in bytes from ls-tree ("-" for trees), stage
            //         number from ls-files
            // path:   file path

            let kind = match mode {
                b"040000" => EntryKind::Tree,
                b"120000" => EntryKind::Symlink,
                b"100755" => EntryKind::ExecutableFile,
                b"160000" => EntryKind::Submodule,
                _ => EntryKind::File,
            };

            TreeEntry {
                name: path.to_vec(),
                kind,
            }
        })
        .collect()
}
