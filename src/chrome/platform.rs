use std::path::{Path, PathBuf};

use super::ChromeError;

/// Find a Chrome executable.
///
/// Checks the `CHROME_PATH` environment variable first (the override must
/// exist), then falls back to platform well-known paths.
///
/// # Errors
///
/// Returns `ChromeError::NotFound` if `CHROME_PATH` points at a missing
/// file or no candidate executable exists.
pub fn find_chrome_executable() -> Result<PathBuf, ChromeError> {
    let env_override = std::env::var("CHROME_PATH").ok().map(PathBuf::from);
    find_chrome_from(env_override.as_deref())
}

/// Testable core of [`find_chrome_executable`]: accepts the environment
/// override as a parameter instead of reading `CHROME_PATH` directly.
fn find_chrome_from(env_override: Option<&Path>) -> Result<PathBuf, ChromeError> {
    if let Some(p) = env_override {
        // An explicit override that does not exist or cannot be executed
        // is an error, not a fallthrough: the user asked for that exact
        // binary.
        if !p.exists() {
            return Err(ChromeError::NotFound(format!(
                "CHROME_PATH points to a missing file: {}",
                p.display()
            )));
        }
        if !is_executable(p) {
            return Err(ChromeError::NotFound(format!(
                "CHROME_PATH is not executable: {}",
                p.display()
            )));
        }
        return Ok(p.to_path_buf());
    }

    for candidate in chrome_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ChromeError::NotFound(
        "no Chrome or Chromium executable found. Set CHROME_PATH to the binary".into(),
    ))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.exists()
    }
}

/// All candidate executable paths for the current platform.
fn chrome_candidates() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        let path_dirs: Vec<PathBuf> = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .map(PathBuf::from)
            .collect();

        let names = [
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
        ];

        let mut candidates = Vec::new();
        for name in names {
            for dir in &path_dirs {
                candidates.push(dir.join(name));
            }
        }
        candidates
    }

    #[cfg(target_os = "windows")]
    {
        let program_files = std::env::var("ProgramFiles").unwrap_or_default();
        let program_files_x86 = std::env::var("ProgramFiles(x86)").unwrap_or_default();
        vec![
            PathBuf::from(&program_files).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&program_files_x86).join("Google/Chrome/Application/chrome.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_candidates_is_not_empty() {
        assert!(!chrome_candidates().is_empty());
    }

    #[test]
    fn chrome_path_override_existing_file() {
        // Use the test binary itself as a known-existing file
        let exe = std::env::current_exe().unwrap();
        let result = find_chrome_from(Some(&exe));
        assert_eq!(result.unwrap(), exe);
    }

    #[test]
    fn chrome_path_override_missing_file_is_an_error() {
        let fake = Path::new("/nonexistent/bdg-test-chrome");
        let result = find_chrome_from(Some(fake));
        assert!(matches!(result, Err(ChromeError::NotFound(_))));
    }
}
