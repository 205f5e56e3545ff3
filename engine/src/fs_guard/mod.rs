use sdk::errors::EngineError;
use std::path::{Component, Path, PathBuf};

/// FileSystemGuard confines model-driven file operations to one application's
/// artifact directory.
///
/// It keeps a deny list of paths a generated project must never read or
/// write (credentials, VCS metadata, installed dependencies) and performs
/// double canonicalization checks to prevent symlink-based bypasses.
///
/// # Security Model
///
/// Existing paths pass four gates:
/// 1. Check deny list before canonicalization
/// 2. Canonicalize path to resolve symlinks and .. patterns
/// 3. Check deny list after canonicalization
/// 4. Verify path is within the workspace
///
/// Paths that do not exist yet (new files) are checked lexically first:
/// absolute paths and `..` components are rejected outright, then the nearest
/// existing ancestor goes through the same gates.
#[derive(Debug)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Creates a guard rooted at `workspace`, which must already exist.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathCanonicalization` if the workspace cannot be
    /// canonicalized.
    pub fn new(workspace: PathBuf) -> Result<Self, EngineError> {
        // Canonicalize workspace to handle symlinks (e.g., /var -> /private/var on macOS)
        let workspace = workspace
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(workspace.clone(), e.to_string()))?;

        let deny_list = vec![
            PathBuf::from(".ssh"),
            PathBuf::from(".env"),
            PathBuf::from(".git"),
            PathBuf::from(".aws"),
            PathBuf::from("node_modules"),
            PathBuf::from("id_rsa"),
            PathBuf::from("id_ed25519"),
            PathBuf::from(".gnupg"),
            PathBuf::from("credentials"),
            PathBuf::from("private_key"),
            PathBuf::from(".npmrc"),
        ];

        Ok(Self {
            workspace,
            deny_list,
        })
    }

    /// Validates an existing path through four security gates.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathDenied` if the path matches the deny list.
    /// Returns `EngineError::PathCanonicalization` if canonicalization fails.
    /// Returns `EngineError::PathOutsideWorkspace` if the path is outside workspace.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        // Gate 1: Check deny list before canonicalization
        if self.is_denied(path.strip_prefix(&self.workspace).unwrap_or(path)) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }

        // Gate 2: Canonicalize to resolve symlinks and .. patterns
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))?;

        // Gate 3: Check deny list after canonicalization (catches symlink bypasses)
        if self.is_denied(canonical.strip_prefix(&self.workspace).unwrap_or(&canonical)) {
            return Err(EngineError::PathDenied(canonical));
        }

        // Gate 4: Verify within workspace
        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        Ok(canonical)
    }

    /// Resolve a workspace-relative path that may not exist yet.
    ///
    /// Returns the absolute target path. The nearest existing ancestor is
    /// validated, so a symlinked directory cannot redirect the write.
    pub fn resolve_relative(&self, relative: &str) -> Result<PathBuf, EngineError> {
        let rel = Path::new(relative.trim());

        if rel.as_os_str().is_empty() {
            return Err(EngineError::ToolError("path must not be empty".to_string()));
        }

        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(EngineError::PathOutsideWorkspace(rel.to_path_buf()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(EngineError::PathOutsideWorkspace(rel.to_path_buf()));
                }
            }
        }

        if self.is_denied(rel) {
            return Err(EngineError::PathDenied(rel.to_path_buf()));
        }

        let target = self.workspace.join(rel);

        let mut ancestor = target.as_path();
        while !ancestor.exists() {
            ancestor = match ancestor.parent() {
                Some(parent) => parent,
                None => return Err(EngineError::PathOutsideWorkspace(target.clone())),
            };
        }
        self.validate_path(ancestor)?;

        Ok(target)
    }

    /// Checks if a path matches any entry in the deny list.
    ///
    /// Catches both a denied suffix (`config/.ssh/id_rsa`) and a denied
    /// component anywhere in the path (`project/.env/config`).
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .zip(denied.as_os_str().to_str())
                        .is_some_and(|(part, d)| part == d)
                })
        })
    }

    /// Returns a reference to the workspace path.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}
