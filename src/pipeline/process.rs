// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ExternalProcessError, ReleaseError};
use crate::events::{ConsoleEvent, EventBus};

/// Lines of output kept for error reports
const OUTPUT_TAIL: usize = 20;

/// Runs external build tools, streaming their output to the console
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    events: EventBus,
}

fn forward_lines<R>(reader: R, sender: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if sender.send(line).is_err() {
                break;
            }
        }
    });
}

impl ProcessRunner {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Run `program` to completion; stdout and stderr are merged line by line
    ///
    /// Returns the last lines of output on success. A non-zero exit status is
    /// an `ExternalProcessError` carrying the same tail.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<Vec<String>, ReleaseError> {
        info!(program, args = ?args, "Starting external process");
        self.events
            .message(format!("Running {} {}", program, args.join(" ")));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", program))?;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, sender.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, sender);
        }

        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL);
        while let Some(line) = receiver.recv().await {
            debug!(program, line = %line, "Process output");
            self.events.publish(ConsoleEvent::ProcessOutput {
                program: program.to_string(),
                line: line.clone(),
            });
            if tail.len() == OUTPUT_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {}", program))?;
        let output: Vec<String> = tail.into();

        if status.success() {
            info!(program, "External process finished");
            Ok(output)
        } else {
            warn!(program, code = ?status.code(), "External process failed");
            Err(ExternalProcessError {
                program: program.to_string(),
                code: status.code(),
                output,
            }
            .into())
        }
    }
}
