//! Display power commands.

use async_trait::async_trait;
use log::info;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

use crate::error::{RelayError, Result};

/// default command turning the display on
pub const DEFAULT_POWER_ON: &str = "vcgencmd display_power 1";
/// default command turning the display off
pub const DEFAULT_POWER_OFF: &str = "vcgencmd display_power 0";

/// upper bound for one power command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Switches the physical display.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DisplayPower: Send + Sync {
    /// `Ok` only once the display confirmed the change
    async fn set_power(&self, on: bool) -> Result<()>;
}

/// program plus arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// split on whitespace, first word is the program
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| RelayError::invalid_config("empty display power command"))?;
        Ok(CommandLine {
            program,
            args: words.collect(),
        })
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs an external process per switch; exit status decides success.
#[derive(Clone, Debug)]
pub struct ShellDisplayPower {
    on: CommandLine,
    off: CommandLine,
    timeout: Duration,
}

impl ShellDisplayPower {
    pub fn new(on: CommandLine, off: CommandLine) -> Self {
        ShellDisplayPower {
            on,
            off,
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// override the per-command time limit
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    async fn run(&self, command: &CommandLine) -> Result<()> {
        let mut process = Command::new(&command.program);
        process.args(&command.args).kill_on_drop(true);
        let output = timeout(self.timeout, process.output())
            .await
            .map_err(|_| {
                RelayError::power_command(command.to_string(), format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| RelayError::power_command(command.to_string(), e.to_string()))?;

        if output.status.success() {
            info!("Ran '{command}'");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RelayError::power_command(
                command.to_string(),
                format!("{} {}", output.status, stderr.trim()),
            ))
        }
    }
}

impl Default for ShellDisplayPower {
    fn default() -> Self {
        ShellDisplayPower::new(
            CommandLine {
                program: "vcgencmd".to_string(),
                args: vec!["display_power".to_string(), "1".to_string()],
            },
            CommandLine {
                program: "vcgencmd".to_string(),
                args: vec!["display_power".to_string(), "0".to_string()],
            },
        )
    }
}

#[async_trait]
impl DisplayPower for ShellDisplayPower {
    async fn set_power(&self, on: bool) -> Result<()> {
        let command = if on { &self.on } else { &self.off };
        self.run(command).await
    }
}
