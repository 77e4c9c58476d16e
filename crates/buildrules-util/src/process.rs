//! Structured external-command values and their execution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::UtilError;

/// An external command kept as data until it is executed.
///
/// Arguments are passed to the program verbatim; no shell is involved, so
/// paths with spaces or quotes need no escaping.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    secret: BTreeSet<String>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a command running `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            secret: BTreeSet::new(),
            cwd: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Overlay one environment variable on the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Overlay a variable whose value is hidden when the command is displayed.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.secret.insert(key.clone());
        self.env.insert(key, value.into());
        self
    }

    /// Overlay several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Run the command in `dir` instead of the caller's working directory.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Prefix the command with another program, e.g. `sudo`.
    pub fn wrapped_in(self, wrapper: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len().saturating_add(1));
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: wrapper.to_owned(),
            args,
            env: self.env,
            secret: self.secret,
            cwd: self.cwd,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Build the `std::process::Command` for this value.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run the command with inherited stdio and wait for it to exit.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned. A non-zero exit is
    /// **not** an error; check `ExitInfo::success`.
    pub fn status(&self) -> Result<ExitInfo, UtilError> {
        let status = self
            .to_command()
            .status()
            .map_err(|source| UtilError::CommandExec {
                program: self.program.clone(),
                source,
            })?;
        Ok(ExitInfo {
            success: status.success(),
            exit_code: status.code(),
        })
    }

    /// Run the command and capture its output.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned. A non-zero exit is
    /// **not** an error; check `CommandOutput::success`.
    pub fn output(&self) -> Result<CommandOutput, UtilError> {
        let output = self
            .to_command()
            .output()
            .map_err(|source| UtilError::CommandExec {
                program: self.program.clone(),
                source,
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            exit_code: output.status.code(),
        })
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: BTreeMap<&str, &str> = self
            .env
            .iter()
            .map(|(k, v)| {
                let shown = if self.secret.contains(k) { "<redacted>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env)
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Renders like a shell line, for describe output and logs only.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.cwd {
            write!(f, "(cd {} && ", quote(&dir.display().to_string()))?;
        }
        for (k, v) in &self.env {
            if self.secret.contains(k) {
                write!(f, "{k}=<redacted> ")?;
            } else {
                write!(f, "{k}={} ", quote(v))?;
            }
        }
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        if self.cwd.is_some() {
            f.write_str(")")?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// How a process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
}

/// Structured output from a command execution.
#[derive(Debug)]
pub struct CommandOutput {
    /// Standard output as a string.
    pub stdout: String,
    /// Standard error as a string.
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn output_success() {
        let output = CommandSpec::new("echo").arg("hello").output().unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn status_failure_is_not_an_error() {
        let exit = CommandSpec::new("false").status().unwrap();
        assert!(!exit.success);
        assert_ne!(exit.exit_code, Some(0));
    }

    #[test]
    fn missing_binary_is_an_error() {
        let err = CommandSpec::new("nonexistent_binary_xyz_123")
            .status()
            .unwrap_err();
        assert!(matches!(err, UtilError::CommandExec { .. }), "got {err}");
    }

    #[test]
    fn env_overlay_and_cwd_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let output = CommandSpec::new("sh")
            .args(["-c", "echo \"$GREETING\" && pwd"])
            .env("GREETING", "hi there")
            .current_dir(tmp.path())
            .output()
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("hi there"));
        let pwd = lines.next().unwrap();
        assert_eq!(
            Path::new(pwd).canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn wrapped_in_prefixes_program() {
        let spec = CommandSpec::new("singularity").args(["build", "-F"]).wrapped_in("sudo");
        assert_eq!(spec.program(), "sudo");
        assert_eq!(spec.get_args(), ["singularity", "build", "-F"]);
    }

    #[test]
    fn display_quotes_only_when_needed() {
        let spec = CommandSpec::new("rsync")
            .args(["-surlptDxv", "/src dir/", "host:/dest"])
            .env("PATH", "/opt/bin:/usr/bin");
        assert_eq!(
            spec.to_string(),
            "PATH=/opt/bin:/usr/bin rsync -surlptDxv '/src dir/' host:/dest"
        );
    }

    #[test]
    fn display_hides_secret_env() {
        let spec = CommandSpec::new("env")
            .secret_env("SINGULARITY_DOCKER_PASSWORD", "hunter2")
            .env("A", "1");
        let shown = spec.to_string();
        assert_eq!(shown, "A=1 SINGULARITY_DOCKER_PASSWORD=<redacted> env");
        let output = spec.output().unwrap();
        assert!(output.stdout.contains("SINGULARITY_DOCKER_PASSWORD=hunter2"));
    }

    #[test]
    fn display_includes_cwd() {
        let spec = CommandSpec::new("ls").current_dir(Path::new("/tmp"));
        assert_eq!(spec.to_string(), "(cd /tmp && ls)");
    }
}
