/// Hook installer
///
/// Handles installation and uninstallation of shell hooks.

use crate::config::HOME_DIR_NAME;
use crate::error::{RecallError, Result};
use crate::shell::{Shell, ShellDetector};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Hook file contents embedded at compile time
const BASH_HOOK: &str = include_str!("../../hooks/bash.sh");
const ZSH_HOOK: &str = include_str!("../../hooks/zsh.sh");

/// Marker line written above the source line
const RC_MARKER: &str = "# totalrecall hook (auto-generated)";

/// Hook installer
pub struct HookInstaller {
    home: PathBuf,
    hooks_dir: PathBuf,
}

impl HookInstaller {
    /// Installer for the current user's home directory
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| RecallError::Config("Could not determine home directory".to_string()))?;
        Ok(Self::with_home(home))
    }

    /// Installer rooted at `home`; hooks go to `home/.totalrecall/hooks`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let hooks_dir = home.join(HOME_DIR_NAME).join("hooks");
        Self { home, hooks_dir }
    }

    pub fn hooks_dir(&self) -> &Path {
        &self.hooks_dir
    }

    /// Install hooks for the detected shell
    pub fn install_auto(&self) -> Result<Shell> {
        let shell = ShellDetector::detect()?;
        self.install(shell)?;
        Ok(shell)
    }

    /// Install hooks for a specific shell
    pub fn install(&self, shell: Shell) -> Result<()> {
        fs::create_dir_all(&self.hooks_dir)?;

        let hook_path = self.hook_path(shell);
        fs::write(&hook_path, hook_content(shell))?;

        // Make hook executable (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&hook_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&hook_path, perms)?;
        }

        self.update_rc_file(shell, &hook_path)?;
        info!(%shell, path = %hook_path.display(), "hook installed");

        Ok(())
    }

    /// Install hooks for every shell that has an rc file
    pub fn install_all(&self) -> Result<Vec<Shell>> {
        let mut installed = Vec::new();

        for shell in ShellDetector::detect_all(&self.home) {
            match self.install(shell) {
                Ok(()) => installed.push(shell),
                Err(e) => warn!(%shell, error = %e, "failed to install hook"),
            }
        }

        if installed.is_empty() {
            return Err(RecallError::Config("No shells could be configured".to_string()));
        }

        Ok(installed)
    }

    /// Remove the hook file and its rc lines
    pub fn uninstall(&self, shell: Shell) -> Result<()> {
        let hook_path = self.hook_path(shell);
        let rc_path = shell.rc_file_path(&self.home);

        if rc_path.exists() {
            let content = fs::read_to_string(&rc_path)?;
            let source_cmd = shell.source_command(&hook_path);

            let mut new_content: String = content
                .lines()
                .filter(|line| *line != source_cmd && *line != RC_MARKER)
                .collect::<Vec<_>>()
                .join("\n");
            if content.ends_with('\n') {
                new_content.push('\n');
            }

            fs::write(&rc_path, new_content)?;
        }

        if hook_path.exists() {
            fs::remove_file(&hook_path)?;
        }

        info!(%shell, "hook removed");
        Ok(())
    }

    /// Hook file present and sourced from the rc file
    pub fn is_installed(&self, shell: Shell) -> bool {
        let hook_path = self.hook_path(shell);
        if !hook_path.exists() {
            return false;
        }

        fs::read_to_string(shell.rc_file_path(&self.home))
            .map(|content| content.contains(&shell.source_command(&hook_path)))
            .unwrap_or(false)
    }

    fn hook_path(&self, shell: Shell) -> PathBuf {
        self.hooks_dir.join(shell.hook_filename())
    }

    fn update_rc_file(&self, shell: Shell, hook_path: &Path) -> Result<()> {
        let rc_path = shell.rc_file_path(&self.home);

        if let Some(parent) = rc_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut content = if rc_path.exists() {
            fs::read_to_string(&rc_path)?
        } else {
            String::new()
        };

        let source_cmd = shell.source_command(hook_path);
        if content.contains(&source_cmd) {
            return Ok(()); // Already installed
        }

        if !content.ends_with('\n') && !content.is_empty() {
            content.push('\n');
        }

        content.push('\n');
        content.push_str(RC_MARKER);
        content.push('\n');
        content.push_str(&source_cmd);
        content.push('\n');

        fs::write(&rc_path, content)?;

        Ok(())
    }
}

fn hook_content(shell: Shell) -> &'static str {
    match shell {
        Shell::Bash => BASH_HOOK,
        Shell::Zsh => ZSH_HOOK,
    }
}
