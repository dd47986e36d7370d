use std::{path::PathBuf, process::Stdio, sync::Mutex, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures_util::future::BoxFuture;
use tokio::process::Command;

/// How long the launcher gets to report failure before the open counts as done.
pub const OPENER_WAIT: Duration = Duration::from_secs(2);

/// Opens an external URL in a new browser context. Errors mean "blocked".
pub trait LinkOpener: Send + Sync {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Hands the URL to the platform's default handler.
#[derive(Debug, Default)]
pub struct SystemOpener {
    program: Option<PathBuf>,
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> Command {
    let mut c = Command::new("open");
    c.arg(url);
    c
}

#[cfg(windows)]
fn opener_command(url: &str) -> Command {
    let mut c = Command::new("cmd");
    // The empty string is the window title `start` expects before the target.
    c.args(["/C", "start", "", url]);
    c
}

#[cfg(all(unix, not(target_os = "macos")))]
fn opener_command(url: &str) -> Command {
    let mut c = Command::new("xdg-open");
    c.arg(url);
    c
}

impl SystemOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `program <url>` instead of the platform launcher.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn command(&self, url: &str) -> Command {
        match &self.program {
            Some(p) => {
                let mut c = Command::new(p);
                c.arg(url);
                c
            }
            None => opener_command(url),
        }
    }

    async fn launch(&self, url: &str) -> Result<()> {
        let mut child = self
            .command(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launch link opener failed: {url}"))?;
        match tokio::time::timeout(OPENER_WAIT, child.wait()).await {
            Ok(status) => {
                let status = status.context("wait for link opener failed")?;
                if status.success() {
                    Ok(())
                } else {
                    Err(anyhow!("link opener exited with {status}: {url}"))
                }
            }
            // Still running: the handler took the URL. The runtime reaps it on drop.
            Err(_) => Ok(()),
        }
    }
}

impl LinkOpener for SystemOpener {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.launch(url))
    }
}

/// Records requests instead of launching anything.
#[derive(Default)]
pub struct DryRunOpener {
    opened: Mutex<Vec<String>>,
}

impl DryRunOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LinkOpener for DryRunOpener {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_records_in_order() {
        let o = DryRunOpener::new();
        o.open("https://mail.google.com").await.unwrap();
        o.open("https://www.youtube.com").await.unwrap();
        assert_eq!(
            o.opened(),
            vec!["https://mail.google.com", "https://www.youtube.com"]
        );
    }

    #[cfg(unix)]
    fn launcher_script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let p = dir.join("fake-open");
        std::fs::write(&p, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        p
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_launcher_reports_blocked() {
        let td = tempfile::tempdir().expect("tempdir");
        let o = SystemOpener::with_program(launcher_script(td.path(), "exit 3"));
        let err = o.open("https://mail.google.com").await.unwrap_err();
        assert!(err.to_string().contains("exited with"), "{err:#}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_launcher_opens() {
        let td = tempfile::tempdir().expect("tempdir");
        let o = SystemOpener::with_program(launcher_script(td.path(), "exit 0"));
        o.open("https://www.youtube.com").await.unwrap();
    }

    #[tokio::test]
    async fn missing_launcher_reports_blocked() {
        let td = tempfile::tempdir().expect("tempdir");
        let o = SystemOpener::with_program(td.path().join("no-such-opener"));
        assert!(o.open("https://music.youtube.com").await.is_err());
    }
}
