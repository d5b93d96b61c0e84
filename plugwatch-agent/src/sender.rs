//! Ingestion through the external sender utility.
//!
//! One invocation per value: the sender is started with the target and host
//! label on its argv and reads a single item line from stdin. Whether the
//! value actually landed is the sender's business; we only surface its exit
//! status.

use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to run sender: {0}")]
    Io(#[from] std::io::Error),
    #[error("sender exited with {0}")]
    Status(std::process::ExitStatus),
}

/// Handle on the external sender, bound to one target and host label.
#[derive(Debug)]
pub struct SenderClient {
    argv: Vec<String>,
    target: String,
    host_label: String,
    namespace: String,
    verbose: bool,
}

impl SenderClient {
    /// `argv` is the shell-split sender command line, validated at preflight.
    pub fn new(
        argv: Vec<String>,
        target: String,
        host_label: String,
        namespace: String,
        verbose: bool,
    ) -> Self {
        Self { argv, target, host_label, namespace, verbose }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host_label(&self) -> &str {
        &self.host_label
    }

    /// Pushes one value as `- <namespace>[<key>] <value>` on the sender's stdin.
    pub fn send(&self, key: &str, value: &str) -> Result<(), SendError> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .arg("-z")
            .arg(&self.target)
            .arg("-s")
            .arg(&self.host_label)
            .arg("-i")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.verbose {
            cmd.arg("-vv");
        }

        let mut child = cmd.spawn()?;
        let line = format!("- {}[{}] {}\n", self.namespace, key, value);
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(line.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if self.verbose {
            print!("{stdout}");
            eprint!("{stderr}");
        } else {
            if !stdout.trim().is_empty() {
                debug!("sender: {}", stdout.trim_end());
            }
            if !stderr.trim().is_empty() {
                debug!("sender stderr: {}", stderr.trim_end());
            }
        }

        if !output.status.success() {
            return Err(SendError::Status(output.status));
        }
        Ok(())
    }
}
