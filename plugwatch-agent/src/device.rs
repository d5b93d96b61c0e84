//! Device CLI invocation and the per-run query cache.

use std::process::Command;
use tracing::{debug, warn};

/// Handle on the external device CLI, bound to one plug address.
#[derive(Debug)]
pub struct PlugClient {
    argv: Vec<String>,
    host: String,
}

impl PlugClient {
    /// `argv` is the shell-split device command line, validated at preflight.
    pub fn new(argv: Vec<String>, host: String) -> Self {
        Self { argv, host }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs `<cmd...> <host> <endpoint>` to completion and captures stdout.
    ///
    /// A non-zero exit is only logged; whatever the tool printed is still
    /// used, matching how a shell capture would behave.
    fn query(&self, endpoint: &str) -> std::io::Result<String> {
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(&self.host)
            .arg(endpoint)
            .output()?;
        if !output.status.success() {
            warn!("device query {} exited with {}", endpoint, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The two expensive device queries, each issued at most once per run.
#[derive(Debug, Default)]
pub struct QueryCache {
    energy: Option<String>,
    info: Option<String>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Energy report output, querying the device on first use.
    pub fn energy(&mut self, plug: &PlugClient) -> &str {
        self.energy.get_or_insert_with(|| fetch(plug, "emeter"))
    }

    /// System-info output, querying the device on first use.
    pub fn info(&mut self, plug: &PlugClient) -> &str {
        self.info.get_or_insert_with(|| fetch(plug, "info"))
    }
}

fn fetch(plug: &PlugClient, endpoint: &str) -> String {
    match plug.query(endpoint) {
        Ok(output) => {
            debug!("device {} query returned {} bytes", endpoint, output.len());
            output
        }
        Err(e) => {
            warn!("device {} query failed: {}", endpoint, e);
            String::new()
        }
    }
}
