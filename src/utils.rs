//! # Utility Functions Module
//!
//! Helpers shared by the engine adapters: argument vectors and a single way
//! of running an external engine with a timeout and typed spawn errors.

use crate::error::{Result, RespimgError};
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::debug;

/// Converts a vector of string-like items to Vec<String>.
///
/// # Example
/// ```rust
/// use respimg::utils::to_string_vec;
///
/// let width = 640;
/// let args = to_string_vec(["-thumbnail", width.to_string().as_str(), "-strip"]);
/// assert_eq!(args, vec!["-thumbnail", "640", "-strip"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Macro for even more convenient argument building.
///
/// # Example
/// ```rust
/// use respimg::args;
///
/// let quality = 82;
/// let args = args!["-quality", quality, "-strip"];
/// assert_eq!(args, vec!["-quality", "82", "-strip"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec([$($item.to_string()),*])
    };
}

/// Run an engine command to completion, feeding `stdin` when given.
///
/// A spawn failure (binary missing, not executable) comes back as
/// [`RespimgError::MissingEngine`], distinct from a non-zero exit of a binary
/// that did start. The child is killed if the timeout elapses.
pub async fn run_engine(
    engine: &str,
    mut command: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<Output> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}: {:?}", engine, command.as_std());
    let start_time = Instant::now();

    let mut child = command.spawn().map_err(|source| RespimgError::MissingEngine {
        engine: engine.to_string(),
        source,
    })?;

    // stdin is fed while stdout/stderr are drained, both under the timeout
    let pipe = child.stdin.take();
    let run = async {
        let (fed, output) = tokio::join!(feed_stdin(pipe, stdin), child.wait_with_output());
        fed?;
        output
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| RespimgError::Timeout {
            engine: engine.to_string(),
            elapsed: start_time.elapsed(),
        })??;

    debug!(
        "{} finished in {:?} with {}",
        engine,
        start_time.elapsed(),
        output.status
    );
    Ok(output)
}

/// Write the payload and close the pipe. A child that exits without reading
/// all of it is judged by its exit status, so a broken pipe is not an error.
async fn feed_stdin(pipe: Option<ChildStdin>, input: Option<Vec<u8>>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return Ok(());
    };
    let written = match pipe.write_all(&input).await {
        Ok(()) => pipe.shutdown().await,
        Err(e) => Err(e),
    };
    match written {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!("Engine closed stdin early");
            Ok(())
        }
        other => other,
    }
}

/// The engine's stderr, or its exit status when stderr is empty.
pub fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}
