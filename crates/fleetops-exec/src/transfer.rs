//! Transfer planning shared by the local and SSH executors
//!
//! A transfer is flattened into the remote directories to create and the
//! files to copy, so both executors move exactly the same set of paths.
//! Mirrored transfers also remove remote entries the source no longer has,
//! leaving excluded names alone.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ExecError;

/// Options applied when copying a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Entry names to skip. A trailing `/` restricts the pattern to directories.
    pub excludes: Vec<String>,
    /// Remove remote entries missing from a directory source
    pub delete: bool,
}

impl TransferOptions {
    /// No exclusions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror of a working tree: build output, dependency caches, VCS
    /// metadata and local env files are neither sent nor deleted.
    #[must_use]
    pub fn working_tree() -> Self {
        Self::new()
            .mirror()
            .exclude("target/")
            .exclude("node_modules/")
            .exclude(".git/")
            .exclude(".env")
            .exclude(".env.deploy")
    }

    /// Delete remote entries the source does not have
    #[must_use]
    pub fn mirror(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Add an exclusion pattern
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Whether an entry called `name` should be skipped
    #[must_use]
    pub fn is_excluded(&self, name: &str, is_dir: bool) -> bool {
        self.excludes.iter().any(|pattern| match pattern.strip_suffix('/') {
            Some(dir_name) => is_dir && dir_name == name,
            None => pattern == name,
        })
    }
}

/// One file to copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEntry {
    /// Source on the local machine
    pub local: PathBuf,
    /// Destination path on the node
    pub remote: String,
    /// Permission bits to apply on the node
    pub mode: u32,
}

impl TransferEntry {
    /// Shell command that writes stdin to the destination and applies the mode
    #[must_use]
    pub fn upload_command(&self) -> String {
        let remote = shell_quote(&self.remote);
        format!("cat > {remote} && chmod {:o} {remote}", self.mode)
    }
}

/// Flattened transfer: directories first, then files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    /// Remote root of a directory transfer
    pub root: Option<String>,
    /// Remote directories to create
    pub dirs: Vec<String>,
    /// Files to copy
    pub files: Vec<TransferEntry>,
}

impl TransferPlan {
    /// Build a plan for copying `local` to `remote`
    ///
    /// # Errors
    /// Returns `ExecError::TransferFailed` if `local` does not exist or a
    /// directory cannot be read
    pub fn build(local: &Path, remote: &str, options: &TransferOptions) -> Result<Self, ExecError> {
        let metadata = fs::metadata(local).map_err(|e| transfer_error(local, &e))?;
        let mut plan = Self::default();

        if metadata.is_dir() {
            let root = remote.trim_end_matches('/').to_string();
            plan.dirs.push(root.clone());
            plan.walk(local, &root, options)?;
            plan.root = Some(root);
        } else {
            if let Some(parent) = remote_parent(remote) {
                plan.dirs.push(parent);
            }
            plan.files.push(TransferEntry {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                mode: file_mode(&metadata),
            });
        }

        debug!(
            local = %local.display(),
            remote = %remote,
            dirs = plan.dirs.len(),
            files = plan.files.len(),
            "planned transfer"
        );

        Ok(plan)
    }

    fn walk(&mut self, dir: &Path, remote_dir: &str, options: &TransferOptions) -> Result<(), ExecError> {
        let mut entries = fs::read_dir(dir)
            .map_err(|e| transfer_error(dir, &e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| transfer_error(dir, &e))?;
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .map_err(|e| transfer_error(&path, &e))?
                .is_dir();

            if options.is_excluded(&name, is_dir) {
                continue;
            }

            let remote = format!("{remote_dir}/{name}");
            if is_dir {
                self.dirs.push(remote.clone());
                self.walk(&path, &remote, options)?;
            } else {
                let mode = fs::metadata(&path)
                    .map(|m| file_mode(&m))
                    .map_err(|e| transfer_error(&path, &e))?;
                self.files.push(TransferEntry {
                    local: path,
                    remote,
                    mode,
                });
            }
        }

        Ok(())
    }

    /// Whether there is nothing to copy
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Command listing everything under the root as `d ./path` or `f ./path`
    ///
    /// `None` for single-file transfers, which never delete.
    #[must_use]
    pub fn listing_command(&self) -> Option<String> {
        let root = shell_quote(self.root.as_deref()?);
        Some(format!(
            "cd {root} && find . -mindepth 1 -type d -exec printf 'd %s\\n' {{}} + \
             && find . -mindepth 1 ! -type d -exec printf 'f %s\\n' {{}} +"
        ))
    }

    /// Remote entries from `listing` that this plan no longer contains
    ///
    /// Anything under an excluded name is kept.
    #[must_use]
    pub fn stale_entries(&self, listing: &str, options: &TransferOptions) -> StaleEntries {
        let mut stale = StaleEntries::default();
        let Some(root) = self.root.as_deref() else {
            return stale;
        };

        for line in listing.lines() {
            let Some((kind, path)) = line.split_once(' ') else {
                continue;
            };
            let relative = path.strip_prefix("./").unwrap_or(path);
            if relative.is_empty() {
                continue;
            }
            let is_dir = kind == "d";
            let components: Vec<&str> = relative.split('/').collect();
            let last = components.len() - 1;
            let excluded = components
                .iter()
                .enumerate()
                .any(|(i, name)| options.is_excluded(name, i < last || is_dir));
            if excluded {
                continue;
            }

            let remote = format!("{root}/{relative}");
            if is_dir {
                if !self.dirs.contains(&remote) {
                    stale.dirs.push(remote);
                }
            } else if !self.files.iter().any(|f| f.remote == remote) {
                stale.files.push(remote);
            }
        }

        // children before parents
        stale
            .dirs
            .sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
        stale
    }
}

/// Remote entries to remove after a mirrored transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleEntries {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

impl StaleEntries {
    /// Shell command removing the entries, `None` when there are none
    ///
    /// Directories still holding excluded entries are left in place.
    #[must_use]
    pub fn removal_command(&self) -> Option<String> {
        let quoted = |paths: &[String]| {
            paths
                .iter()
                .map(|p| shell_quote(p))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let rmdir = (!self.dirs.is_empty())
            .then(|| format!("{{ rmdir -- {} 2>/dev/null; true; }}", quoted(&self.dirs)));
        match (self.files.is_empty(), rmdir) {
            (true, None) => None,
            (true, Some(rmdir)) => Some(rmdir),
            (false, None) => Some(format!("rm -f -- {}", quoted(&self.files))),
            (false, Some(rmdir)) => Some(format!("rm -f -- {} && {rmdir}", quoted(&self.files))),
        }
    }

    /// Number of entries to remove
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// Parent directory of a remote path, if it has one
#[must_use]
pub fn remote_parent(remote: &str) -> Option<String> {
    let trimmed = remote.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

/// Quote a path for a POSIX shell
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Permission bits of a local file
#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}

fn transfer_error(path: &Path, err: &std::io::Error) -> ExecError {
    ExecError::TransferFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_tree_exclusions() {
        let opts = TransferOptions::working_tree();
        assert!(opts.is_excluded("target", true));
        assert!(opts.is_excluded(".git", true));
        assert!(opts.is_excluded(".env", false));
        assert!(!opts.is_excluded("target", false));
        assert!(!opts.is_excluded(".env.production", false));
        assert!(!opts.is_excluded("src", true));
    }

    #[test]
    fn test_plan_directory_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}").unwrap();

        let plan =
            TransferPlan::build(dir.path(), "/srv/app/", &TransferOptions::working_tree()).unwrap();

        assert_eq!(plan.dirs, vec!["/srv/app", "/srv/app/src"]);
        let remotes: Vec<_> = plan.files.iter().map(|f| f.remote.as_str()).collect();
        assert_eq!(remotes, vec!["/srv/app/compose.yml", "/srv/app/src/main.rs"]);
    }

    #[test]
    fn test_plan_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env.production");
        fs::write(&file, "A=1").unwrap();

        let plan = TransferPlan::build(&file, "/srv/app/.env", &TransferOptions::new()).unwrap();
        assert_eq!(plan.dirs, vec!["/srv/app"]);
        assert_eq!(plan.files.len(), 1);
    }

    #[test]
    fn test_plan_missing_source() {
        let result = TransferPlan::build(
            Path::new("/definitely/not/here"),
            "/srv",
            &TransferOptions::new(),
        );
        assert!(matches!(result, Err(ExecError::TransferFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("entrypoint.sh");
        fs::write(&script, "#!/bin/sh\nexec app\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}").unwrap();
        fs::set_permissions(dir.path().join("compose.yml"), fs::Permissions::from_mode(0o644))
            .unwrap();

        let plan = TransferPlan::build(dir.path(), "/srv/app", &TransferOptions::new()).unwrap();
        let modes: Vec<_> = plan.files.iter().map(|f| (f.remote.as_str(), f.mode)).collect();
        assert_eq!(
            modes,
            vec![("/srv/app/compose.yml", 0o644), ("/srv/app/entrypoint.sh", 0o755)]
        );
        assert_eq!(
            plan.files[1].upload_command(),
            "cat > '/srv/app/entrypoint.sh' && chmod 755 '/srv/app/entrypoint.sh'"
        );
    }

    #[test]
    fn test_stale_entries_spare_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();

        let options = TransferOptions::working_tree();
        let plan = TransferPlan::build(dir.path(), "/srv/app", &options).unwrap();
        let listing = "\
d ./src
d ./old
d ./old/assets
d ./node_modules
d ./node_modules/pkg
f ./src/main.rs
f ./src/removed.rs
f ./old/assets/logo.png
f ./node_modules/pkg/index.js
f ./.env
";
        let stale = plan.stale_entries(listing, &options);
        assert_eq!(
            stale.files,
            vec!["/srv/app/src/removed.rs", "/srv/app/old/assets/logo.png"]
        );
        assert_eq!(stale.dirs, vec!["/srv/app/old/assets", "/srv/app/old"]);
        assert_eq!(
            stale.removal_command().unwrap(),
            "rm -f -- '/srv/app/src/removed.rs' '/srv/app/old/assets/logo.png' \
             && { rmdir -- '/srv/app/old/assets' '/srv/app/old' 2>/dev/null; true; }"
        );
    }

    #[test]
    fn test_single_file_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.toml");
        fs::write(&file, "a = 1").unwrap();

        let options = TransferOptions::new().mirror();
        let plan = TransferPlan::build(&file, "/srv/app/app.toml", &options).unwrap();
        assert!(plan.listing_command().is_none());
        assert!(plan.stale_entries("f ./other.toml\n", &options).is_empty());
        assert!(StaleEntries::default().removal_command().is_none());
    }

    #[test]
    fn test_remote_parent_and_quote() {
        assert_eq!(remote_parent("/srv/app/.env").as_deref(), Some("/srv/app"));
        assert_eq!(remote_parent("/file").as_deref(), Some("/"));
        assert_eq!(remote_parent("file"), None);
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
