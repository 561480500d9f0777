//! Narrow collaborator for external tools (ping, dig, whois, host): run, stream lines.
use crate::events::EventBus;
use crate::types::Severity;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `program` and stream its combined stdout/stderr line by line.
    async fn run(&self, program: &str, args: &[String]) -> Result<mpsc::Receiver<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<mpsc::Receiver<String>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;

        let (tx, rx) = mpsc::channel(256);
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, tx.clone()));
        }
        let program = program.to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(%program, ?status, "tool exited");
            drop(tx);
        });
        Ok(rx)
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// How a line of tool output should be reported.
pub fn classify_line(line: &str) -> Severity {
    if line.contains("timeout") || line.contains("error") || line.contains("Unknown") {
        Severity::Error
    } else {
        Severity::Success
    }
}

/// Run a tool and forward its output onto `events` until it exits.
/// Returns the number of lines forwarded.
pub async fn stream_to_events(
    runner: &dyn CommandRunner,
    events: &EventBus,
    program: &str,
    args: &[String],
) -> Result<usize> {
    events.info(format!("Running {program} {}", args.join(" ")));
    let mut rx = match runner.run(program, args).await {
        Ok(rx) => rx,
        Err(e) => {
            events.error(format!("Failed to start {program}: {e}"));
            return Err(e);
        }
    };

    let mut count = 0;
    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        if line.contains("Operation not permitted") {
            events.error(format!("{program} stopped: Operation not permitted"));
            break;
        }
        events.emit(classify_line(&line), line, None);
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<&'static str>);

    #[async_trait]
    impl CommandRunner for Scripted {
        async fn run(&self, _: &str, _: &[String]) -> Result<mpsc::Receiver<String>> {
            let (tx, rx) = mpsc::channel(16);
            for l in &self.0 {
                tx.send(l.to_string()).await?;
            }
            Ok(rx)
        }
    }

    #[test]
    fn classifies_failures() {
        assert_eq!(classify_line("Request timeout for icmp_seq 0"), Severity::Error);
        assert_eq!(classify_line("ping: Unknown host"), Severity::Error);
        assert_eq!(classify_line("64 bytes from 1.1.1.1"), Severity::Success);
    }

    #[tokio::test]
    async fn forwards_lines_and_stops_on_permission_error() {
        let runner = Scripted(vec![
            "PING 1.1.1.1",
            "",
            "64 bytes from 1.1.1.1",
            "ping: sendto: Operation not permitted",
            "never forwarded",
        ]);
        let bus = EventBus::new();
        let n = stream_to_events(&runner, &bus, "ping", &[]).await.unwrap();
        assert_eq!(n, 2);
        let last = bus.history().pop().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert!(last.message.contains("Operation not permitted"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let bus = EventBus::new();
        let res = stream_to_events(&SystemCommandRunner, &bus, "/nonexistent/tool", &[]).await;
        assert!(res.is_err());
        assert_eq!(bus.history().last().unwrap().severity, Severity::Error);
    }
}
