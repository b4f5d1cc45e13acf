/// Shell detection logic
///
/// Detects which shell the user is running and provides shell-specific configuration paths.

use crate::error::{RecallError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Shells we have capture hooks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
}

impl Shell {
    pub const ALL: [Shell; 2] = [Shell::Bash, Shell::Zsh];

    /// Get the shell name as a string
    pub fn name(&self) -> &str {
        match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
        }
    }

    /// Get the hook file name for this shell
    pub fn hook_filename(&self) -> &str {
        match self {
            Shell::Bash => "bash.sh",
            Shell::Zsh => "zsh.sh",
        }
    }

    /// The rc file under `home` that sources the hook
    pub fn rc_file_path(&self, home: &Path) -> PathBuf {
        match self {
            Shell::Bash => {
                // Prefer .bashrc, fallback to .bash_profile
                let bashrc = home.join(".bashrc");
                let profile = home.join(".bash_profile");
                if !bashrc.exists() && profile.exists() {
                    profile
                } else {
                    bashrc
                }
            }
            Shell::Zsh => home.join(".zshrc"),
        }
    }

    /// Line added to the rc file
    pub fn source_command(&self, hook_path: &Path) -> String {
        format!(
            "[ -f \"{}\" ] && source \"{}\"",
            hook_path.display(),
            hook_path.display()
        )
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Shell {
    type Err = RecallError;

    /// Accepts a bare name or a path like `/bin/zsh`
    fn from_str(s: &str) -> Result<Self> {
        let name = s.rsplit('/').next().unwrap_or("").to_lowercase();
        match name.as_str() {
            "bash" => Ok(Shell::Bash),
            "zsh" => Ok(Shell::Zsh),
            _ => Err(RecallError::Config(format!("Unsupported shell: {}", name))),
        }
    }
}

/// Shell detector
pub struct ShellDetector;

impl ShellDetector {
    /// Detect the current shell from `$SHELL`
    pub fn detect() -> Result<Shell> {
        match env::var("SHELL") {
            Ok(shell_path) => shell_path.parse(),
            Err(_) => Err(RecallError::Config(
                "Could not detect shell. Please set $SHELL environment variable.".to_string(),
            )),
        }
    }

    /// Shells that already have an rc file under `home`
    pub fn detect_all(home: &Path) -> Vec<Shell> {
        Shell::ALL
            .iter()
            .copied()
            .filter(|shell| shell.rc_file_path(home).exists())
            .collect()
    }
}
