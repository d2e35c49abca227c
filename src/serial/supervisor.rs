//! Keeps the serial link alive: open, read until failure, back off, reopen.

use std::pin::pin;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{error, info, warn};
use tokio::io::AsyncRead;
use tokio::time::Duration;

use super::lines::LineReader;
use super::port::{PortSettings, SerialStream, open_port};
use crate::error::{RelayError, Result};

/// Exponential backoff between consecutive failed attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    /// consecutive failures tolerated before giving up, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// delay after the `failures`-th consecutive failure (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// whether `failures` consecutive failures exhaust the policy
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

/// Source of serial byte streams.
#[async_trait]
pub trait PortOpener: Send + Sync {
    type Stream: AsyncRead + Unpin + Send;

    /// resolve the device and open it
    async fn open(&self) -> Result<Self::Stream>;
}

/// Opens the real serial device, running discovery on every attempt.
pub struct SerialOpener {
    settings: PortSettings,
}

impl SerialOpener {
    pub fn new(settings: PortSettings) -> Self {
        SerialOpener { settings }
    }
}

#[async_trait]
impl PortOpener for SerialOpener {
    type Stream = SerialStream;

    async fn open(&self) -> Result<SerialStream> {
        let port_name = self.settings.device.resolve()?;
        open_port(&port_name, &self.settings)
    }
}

/// Runs the read loop forever, handing every line to `on_line`.
///
/// Returns only when the retry policy is exhausted. A session that opened
/// successfully resets the failure count.
pub async fn supervise<O, F>(opener: &O, policy: &RetryPolicy, mut on_line: F) -> RelayError
where
    O: PortOpener,
    F: FnMut(&str) + Send,
{
    let mut failures: u32 = 0;
    loop {
        match opener.open().await {
            Ok(stream) => {
                failures = 0;
                info!("Serial session started");
                match read_session(stream, &mut on_line).await {
                    Ok(()) => warn!("Serial device closed the stream"),
                    Err(e) => warn!("Serial session ended: {e}"),
                }
            }
            Err(e) => error!("Serial open attempt failed: {e}"),
        }

        failures += 1;
        if policy.exhausted(failures) {
            error!("Giving up on the serial link after {failures} consecutive failures");
            return RelayError::RetryExhausted { attempts: failures };
        }
        let delay = policy.delay(failures);
        warn!("Reopening serial device in {delay:?} (failure {failures})");
        tokio::time::sleep(delay).await;
    }
}

async fn read_session<S, F>(stream: S, on_line: &mut F) -> Result<()>
where
    S: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut lines = pin!(LineReader::new(stream).into_stream());
    while let Some(line) = lines.try_next().await? {
        on_line(&line);
    }
    Ok(())
}
