//! Terminal window enumeration.
//!
//! Production enumeration shells out to OS automation and is bounded by
//! a timeout; a hung automation call degrades to an empty scan instead
//! of stalling the request pipeline. The matcher depends only on the
//! [`WindowSource`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// An open terminal window observed during a scan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInfo {
    /// Owning application identifier (bundle id or window class).
    pub bundle_id: String,
    /// Current window title.
    pub window_title: String,
}

impl TerminalInfo {
    pub fn new(bundle_id: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            window_title: window_title.into(),
        }
    }

    /// Stable identifier used to key confirmed mappings.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.bundle_id, self.window_title)
    }
}

/// Source of the current set of open terminal windows.
#[async_trait]
pub trait WindowSource: Send + Sync {
    async fn list_terminals(&self) -> Result<Vec<TerminalInfo>, MatchError>;
}

/// Default timeout for the OS automation call.
const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Window classes treated as terminals on non-macOS hosts.
#[cfg(not(target_os = "macos"))]
const TERMINAL_CLASSES: &[&str] = &[
    "kitty",
    "alacritty",
    "gnome-terminal",
    "konsole",
    "xterm",
    "wezterm",
    "foot",
    "terminator",
];

/// Enumerates terminal windows via OS automation subprocesses.
pub struct SystemWindowSource {
    timeout: Duration,
}

impl SystemWindowSource {
    pub fn new() -> Self {
        Self {
            timeout: ENUMERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self) -> Result<Vec<TerminalInfo>, MatchError> {
        let output = tokio::time::timeout(self.timeout, self.command().output())
            .await
            .map_err(|_| {
                MatchError::WindowEnumerationFailed(format!(
                    "enumeration exceeded {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| MatchError::WindowEnumerationFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(MatchError::WindowEnumerationFailed(format!(
                "automation exited with {}",
                output.status
            )));
        }

        Ok(parse_window_list(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "macos")]
    fn command(&self) -> tokio::process::Command {
        // One "bundle_id\ttitle" line per terminal window.
        let script = r#"
            set out to ""
            tell application "System Events"
                repeat with proc in (processes whose background only is false)
                    set bid to bundle identifier of proc
                    if bid is in {"com.apple.Terminal", "com.googlecode.iterm2", "dev.warp.Warp-Stable", "net.kovidgoyal.kitty", "com.github.wez.wezterm", "io.alacritty"} then
                        repeat with w in windows of proc
                            set out to out & bid & tab & (name of w) & linefeed
                        end repeat
                    end if
                end repeat
            end tell
            return out
        "#;
        let mut cmd = tokio::process::Command::new("osascript");
        cmd.arg("-e").arg(script);
        cmd
    }

    #[cfg(not(target_os = "macos"))]
    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("wmctrl");
        cmd.arg("-lx");
        cmd
    }
}

impl Default for SystemWindowSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowSource for SystemWindowSource {
    async fn list_terminals(&self) -> Result<Vec<TerminalInfo>, MatchError> {
        self.run().await
    }
}

#[cfg(target_os = "macos")]
fn parse_window_list(raw: &str) -> Vec<TerminalInfo> {
    raw.lines()
        .filter_map(|line| {
            let (bundle_id, title) = line.split_once('\t')?;
            (!title.trim().is_empty())
                .then(|| TerminalInfo::new(bundle_id.trim(), title.trim()))
        })
        .collect()
}

/// Parse `wmctrl -lx` output: `<id> <desktop> <class> <host> <title...>`.
#[cfg(not(target_os = "macos"))]
fn parse_window_list(raw: &str) -> Vec<TerminalInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _id = parts.next()?;
            let _desktop = parts.next()?;
            let class = parts.next()?;
            let _host = parts.next()?;
            let title = parts.collect::<Vec<_>>().join(" ");

            let class_lower = class.to_lowercase();
            let is_terminal = TERMINAL_CLASSES.iter().any(|t| class_lower.contains(t));
            (is_terminal && !title.is_empty()).then(|| TerminalInfo::new(class, title))
        })
        .collect()
}

/// Fixed window list for tests.
pub struct StaticWindows(pub Vec<TerminalInfo>);

#[async_trait]
impl WindowSource for StaticWindows {
    async fn list_terminals(&self) -> Result<Vec<TerminalInfo>, MatchError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_joins_bundle_and_title() {
        let terminal = TerminalInfo::new("com.apple.Terminal", "notes — zsh");
        assert_eq!(terminal.fingerprint(), "com.apple.Terminal|notes — zsh");
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_parse_wmctrl_output_filters_non_terminals() {
        let raw = "\
0x04000003  0 kitty.kitty            host ~/dev/notes — vim
0x04200003  0 Navigator.firefox      host Mozilla Firefox
0x04400003  1 Alacritty.Alacritty    host server: tail -f
";
        let windows = parse_window_list(raw);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].window_title, "~/dev/notes — vim");
        assert_eq!(windows[1].bundle_id, "Alacritty.Alacritty");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_parse_osascript_output() {
        let raw = "com.apple.Terminal\tnotes — zsh\ncom.googlecode.iterm2\tbuild\n";
        let windows = parse_window_list(raw);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].bundle_id, "com.apple.Terminal");
    }

    #[tokio::test]
    async fn test_static_windows_returns_fixed_list() {
        let source = StaticWindows(vec![TerminalInfo::new("kitty", "dev")]);
        let windows = source.list_terminals().await.unwrap();
        assert_eq!(windows.len(), 1);
    }
}
