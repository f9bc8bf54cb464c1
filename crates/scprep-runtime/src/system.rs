use crate::backend::{CommandSpec, HostBackend};
use crate::RuntimeError;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Host backend for the real machine: shadow-utils for accounts and plain
/// process spawning for everything else.
#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

fn exec(command: &CommandSpec) -> Result<std::process::Output, RuntimeError> {
    debug!("exec: {command}");
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(input) = &command.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
    }
    Ok(child.wait_with_output()?)
}

fn check(command: &CommandSpec, output: std::process::Output) -> Result<String, RuntimeError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(RuntimeError::CommandFailed {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

impl HostBackend for SystemHost {
    fn name(&self) -> &'static str {
        "system"
    }

    fn user_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let cmd = CommandSpec::new("getent").args(["passwd", name]);
        let output = exec(&cmd)?;
        // getent exits 2 when the key is not found.
        match output.status.code() {
            Some(0) => Ok(true),
            Some(2) => Ok(false),
            _ => check(&cmd, output).map(|_| false),
        }
    }

    fn create_user(&self, name: &str) -> Result<(), RuntimeError> {
        if self.user_exists(name)? {
            return Err(RuntimeError::UserExists(name.to_owned()));
        }
        let cmd = CommandSpec::new("useradd").args(["-m", name]);
        check(&cmd, exec(&cmd)?)?;
        debug!("created local user {name}");
        Ok(())
    }

    fn set_password(&self, name: &str, password: &str) -> Result<(), RuntimeError> {
        let cmd = CommandSpec::new("chpasswd").stdin(format!("{name}:{password}\n"));
        check(&cmd, exec(&cmd)?)?;
        debug!("password for {name} updated");
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.user_exists(name)? {
            return Err(RuntimeError::UserNotFound(name.to_owned()));
        }
        let cmd = CommandSpec::new("userdel").args(["-r", name]);
        check(&cmd, exec(&cmd)?)?;
        debug!("deleted user {name} with its home directory");
        Ok(())
    }

    fn run(&self, command: &CommandSpec) -> Result<String, RuntimeError> {
        check(command, exec(command)?)
    }
}
