//! Typed wrapper over the virtualization CLI surface.
//!
//! Builds `CommandSpec`s for the listing, terminate, import, unregister,
//! shutdown and guest-exec verbs and hands them to the shared executor.
//! Guest commands are passed as one `sh -c` argument, never re-quoted.

use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::executor::{CommandOutput, CommandSpec, ExecError, SharedExecutor};

/// Quote a value for a POSIX shell command line
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Clone)]
pub struct Wsl {
    exec: SharedExecutor,
    program: String,
    status_timeout: Duration,
    guest_timeout: Duration,
    import_timeout: Duration,
}

impl Wsl {
    pub fn new(exec: SharedExecutor, config: &Config) -> Self {
        Self {
            exec,
            program: config.distribution.wsl_program.clone(),
            status_timeout: config.timeouts.status(),
            guest_timeout: config.timeouts.guest_command(),
            import_timeout: config.timeouts.import(),
        }
    }

    pub fn executor(&self) -> &SharedExecutor {
        &self.exec
    }

    fn spec(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.program, timeout)
    }

    pub async fn list_verbose(&self) -> Result<CommandOutput, ExecError> {
        self.exec
            .run(&self.spec(self.status_timeout).args(["--list", "--verbose"]))
            .await
    }

    pub async fn list_quiet(&self) -> Result<CommandOutput, ExecError> {
        self.exec
            .run(&self.spec(self.status_timeout).args(["--list", "--quiet"]))
            .await
    }

    pub async fn list(&self) -> Result<CommandOutput, ExecError> {
        self.exec.run(&self.spec(self.status_timeout).arg("--list")).await
    }

    pub async fn version(&self) -> Result<CommandOutput, ExecError> {
        self.exec.run(&self.spec(self.status_timeout).arg("--version")).await
    }

    pub async fn terminate(&self, name: &str) -> Result<CommandOutput, ExecError> {
        info!("Terminating distribution {}", name);
        self.exec
            .run(&self.spec(self.status_timeout).args(["--terminate", name]))
            .await
    }

    pub async fn shutdown(&self) -> Result<CommandOutput, ExecError> {
        info!("Shutting down all distributions");
        self.exec.run(&self.spec(self.status_timeout).arg("--shutdown")).await
    }

    pub async fn unregister(&self, name: &str) -> Result<CommandOutput, ExecError> {
        info!("Unregistering distribution {}", name);
        self.exec
            .run(&self.spec(self.status_timeout).args(["--unregister", name]))
            .await
    }

    pub async fn import(
        &self,
        name: &str,
        install_dir: &Path,
        image: &Path,
    ) -> Result<CommandOutput, ExecError> {
        info!("Importing {} into {}", name, install_dir.display());
        let spec = self.spec(self.import_timeout).args([
            "--import".to_string(),
            name.to_string(),
            install_dir.display().to_string(),
            image.display().to_string(),
        ]);
        self.exec.run(&spec).await
    }

    /// Launch the guest's default shell without waiting for it
    pub async fn launch(&self, name: &str) -> Result<(), ExecError> {
        info!("Starting distribution {}", name);
        self.exec
            .spawn_detached(&self.spec(self.status_timeout).args(["-d", name]))
            .await
    }

    /// Build a guest command spec: `-d <name> [-u root] -e sh -c <cmd>`
    pub fn guest_spec(&self, name: &str, as_root: bool, cmd: &str, timeout: Duration) -> CommandSpec {
        let mut spec = self.spec(timeout).args(["-d", name]);
        if as_root {
            spec = spec.args(["-u", "root"]);
        }
        spec.args(["-e", "sh", "-c", cmd])
    }

    /// Run a guest command as the default user with the standard timeout
    pub async fn exec(&self, name: &str, cmd: &str) -> Result<CommandOutput, ExecError> {
        self.exec
            .run(&self.guest_spec(name, false, cmd, self.guest_timeout))
            .await
    }

    /// Run a guest command as root with the standard timeout
    pub async fn exec_root(&self, name: &str, cmd: &str) -> Result<CommandOutput, ExecError> {
        self.exec
            .run(&self.guest_spec(name, true, cmd, self.guest_timeout))
            .await
    }

    /// Run a prepared spec (custom timeout or secrets)
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.exec.run(spec).await
    }

    /// Run a guest command as root and report only whether it exited 0.
    /// Launch failures and timeouts count as failure.
    pub async fn exec_root_ok(&self, name: &str, cmd: &str) -> bool {
        matches!(self.exec_root(name, cmd).await, Ok(out) if out.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedExecutor;
    use std::sync::Arc;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_guest_spec_layout() {
        let exec = ScriptedExecutor::new();
        let wsl = Wsl::new(Arc::new(exec.clone()), &Config::default());
        wsl.exec_root("PKTWinNode", "apt update").await.unwrap();
        wsl.exec("PKTWinNode", "uptime").await.unwrap();
        let calls = exec.calls();
        assert_eq!(calls[0], "wsl -d PKTWinNode -u root -e sh -c apt update");
        assert_eq!(calls[1], "wsl -d PKTWinNode -e sh -c uptime");
    }

    #[tokio::test]
    async fn test_import_arguments() {
        let exec = ScriptedExecutor::new();
        let wsl = Wsl::new(Arc::new(exec.clone()), &Config::default());
        wsl.import("PKTWinNode", Path::new("/data/WSL/PKTWinNode"), Path::new("/tmp/img.wsl"))
            .await
            .unwrap();
        assert_eq!(
            exec.calls()[0],
            "wsl --import PKTWinNode /data/WSL/PKTWinNode /tmp/img.wsl"
        );
    }
}
