use std::path::{Path, PathBuf};

/// A path access violation, naming the restricted root that matched.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("access denied: {path} is under restricted path {restricted}")]
pub struct PathViolation {
    pub path: String,
    pub restricted: String,
}

/// Filesystem access restrictions, independent of command filtering.
///
/// `no_access` paths are blocked entirely; `read_only` paths may be read but
/// not written. Defaults cover common credential directories.
#[derive(Debug, Clone)]
pub struct PathRestrictions {
    no_access: Vec<PathBuf>,
    read_only: Vec<PathBuf>,
}

impl Default for PathRestrictions {
    fn default() -> Self {
        Self::new(&[], &[])
    }
}

impl PathRestrictions {
    #[must_use]
    pub fn new(no_access: &[String], read_only: &[String]) -> Self {
        let no_access = if no_access.is_empty() {
            default_no_access()
        } else {
            no_access.iter().map(|p| expand_home(Path::new(p))).collect()
        };
        Self {
            no_access,
            read_only: read_only.iter().map(|p| expand_home(Path::new(p))).collect(),
        }
    }

    /// Check whether a path may be accessed at all.
    ///
    /// # Errors
    ///
    /// Returns `PathViolation` naming the restricted root when the path falls
    /// under a no-access directory.
    pub fn check_path(&self, path: &Path) -> Result<(), PathViolation> {
        let expanded = expand_home(path);
        let resolved = expanded.canonicalize().unwrap_or(expanded);
        for restricted in &self.no_access {
            if resolved.starts_with(restricted) {
                return Err(PathViolation {
                    path: resolved.display().to_string(),
                    restricted: restricted.display().to_string(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_read_only(&self, path: &Path) -> bool {
        let expanded = expand_home(path);
        let resolved = expanded.canonicalize().unwrap_or(expanded);
        self.read_only.iter().any(|r| resolved.starts_with(r))
    }

    /// Heuristic extraction of path-like tokens from a command line.
    /// Flags and shell operators are skipped; anything containing `/` or
    /// starting with `~` is treated as a candidate path.
    #[must_use]
    pub fn extract_paths(command: &str) -> Vec<PathBuf> {
        let Ok(tokens) = crate::filter::split_command(command) else {
            return Vec::new();
        };
        tokens
            .into_iter()
            .filter(|t| !t.starts_with('-'))
            .filter(|t| !matches!(t.as_str(), "|" | ">" | "<" | ">>" | "&&" | "||" | ";"))
            .filter(|t| t.contains('/') || t.starts_with('~'))
            .map(PathBuf::from)
            .collect()
    }
}

fn default_no_access() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc"), PathBuf::from("/root")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".ssh"));
        paths.push(home.join(".aws"));
        paths.push(home.join(".config").join("gcloud"));
    }
    paths
}

fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
