use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> PathBuf {
    // Prefer the working directory: state files and the SQLite database are
    // addressed relative to where the operator runs the binary.
    if let Ok(cwd) = std::env::current_dir() {
        return cwd;
    }

    // Fallback: the folder the executable lives in
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve log folder (absolute path), creating it when missing.
pub fn resolve_log_folder(configured: Option<&Path>) -> Result<PathBuf> {
    let log_dir = match configured {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => resolve_deployment_folder().join(p),
        None => resolve_deployment_folder().join("logs"),
    };

    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log folder: {:?}", log_dir))?;
    Ok(log_dir)
}

/// Sibling path used as the cross-process lock for a state file.
pub fn lock_path_for(state_file: &Path) -> PathBuf {
    let mut name = state_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".lock");
    state_file.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_sibling_of_state_file() {
        let p = lock_path_for(Path::new("/srv/barody/.installation"));
        assert_eq!(p, PathBuf::from("/srv/barody/.installation.lock"));

        let p = lock_path_for(Path::new("state/.setup_config.json"));
        assert_eq!(p, PathBuf::from("state/.setup_config.json.lock"));
    }

    #[test]
    fn resolve_log_folder_creates_configured_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("logs");
        let resolved = resolve_log_folder(Some(&target)).expect("resolve");
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }
}
