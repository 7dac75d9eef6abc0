//! tmux-backed session store.
//!
//! Every operation shells out to the tmux client binary.

use std::path::PathBuf;

use tokio::process::Command;

use super::store::{SessionName, SessionStore, StoreError};

/// Session store backed by a local tmux server.
#[derive(Debug, Clone)]
pub struct TmuxStore {
    binary: String,
}

impl TmuxStore {
    /// Creates a store that runs the given tmux binary.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Returns the configured binary name.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolves the binary on `PATH` and queries its version.
    ///
    /// Fails with [`StoreError::NotAvailable`] when tmux cannot be found or
    /// does not run.
    pub async fn check_available(&self) -> Result<(PathBuf, String), StoreError> {
        let path = which::which(&self.binary)
            .map_err(|e| StoreError::NotAvailable(format!("{}: {}", self.binary, e)))?;

        let version = self
            .run(&["-V"])
            .await
            .map_err(|e| StoreError::NotAvailable(e.to_string()))?;

        Ok((path, version.trim().to_string()))
    }

    /// Runs tmux with `args` and returns its standard output.
    async fn run(&self, args: &[&str]) -> Result<String, StoreError> {
        let output = Command::new(&self.binary).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(args = ?args, stderr = %stderr, "tmux command failed");
            return Err(classify_failure(&self.binary, args, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for TmuxStore {
    fn default() -> Self {
        Self::new("tmux")
    }
}

/// Maps a failed tmux invocation to a store error.
fn classify_failure(binary: &str, args: &[&str], stderr: String) -> StoreError {
    let missing_session = stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("can't find pane");

    if missing_session {
        if let Some(target) = target_of(args) {
            return StoreError::NotFound(target.to_string());
        }
    }

    StoreError::CommandFailed {
        command: format!("{} {}", binary, args.join(" ")),
        stderr,
    }
}

/// Returns the value following `-t`, if any.
fn target_of<'a>(args: &[&'a str]) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == "-t")
        .and_then(|i| args.get(i + 1).copied())
}

/// Whether tmux reported that no server is running, which means no sessions.
fn is_no_server(err: &StoreError) -> bool {
    match err {
        StoreError::CommandFailed { stderr, .. } => {
            stderr.contains("no server running")
                || stderr.contains("error connecting to")
                || stderr.contains("no sessions")
        }
        _ => false,
    }
}

/// Splits `list-sessions` output into names.
fn parse_session_list(stdout: &str) -> Vec<SessionName> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl SessionStore for TmuxStore {
    async fn list(&self) -> Result<Vec<SessionName>, StoreError> {
        match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(stdout) => Ok(parse_session_list(&stdout)),
            Err(e) if is_no_server(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn capture(&self, session: &str, scrollback: u32) -> Result<String, StoreError> {
        let start = format!("-{}", scrollback);
        self.run(&["capture-pane", "-t", session, "-p", "-S", start.as_str()])
            .await
    }

    async fn create(&self, name: &str, command: &str) -> Result<(), StoreError> {
        self.run(&["new-session", "-d", "-s", name, command]).await?;
        tracing::info!(session = %name, command = %command, "Created tmux session");
        Ok(())
    }

    async fn kill(&self, name: &str) -> Result<(), StoreError> {
        self.run(&["kill-session", "-t", name]).await?;
        tracing::info!(session = %name, "Killed tmux session");
        Ok(())
    }

    async fn send_text(&self, session: &str, text: &str) -> Result<(), StoreError> {
        self.run(&["send-keys", "-t", session, "-l", text]).await?;
        Ok(())
    }

    async fn send_key(&self, session: &str, key: &str) -> Result<(), StoreError> {
        self.run(&["send-keys", "-t", session, key]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_list() {
        let names = parse_session_list("main\nwork\n\n  build  \n");
        assert_eq!(names, vec!["main", "work", "build"]);
    }

    #[test]
    fn test_parse_session_list_empty() {
        assert!(parse_session_list("").is_empty());
        assert!(parse_session_list("\n\n").is_empty());
    }

    #[test]
    fn test_target_of() {
        assert_eq!(target_of(&["kill-session", "-t", "work"]), Some("work"));
        assert_eq!(target_of(&["list-sessions"]), None);
        assert_eq!(target_of(&["send-keys", "-t"]), None);
    }

    #[test]
    fn test_classify_missing_session() {
        let err = classify_failure(
            "tmux",
            &["capture-pane", "-t", "gone", "-p"],
            "can't find session: gone".to_string(),
        );
        assert!(matches!(err, StoreError::NotFound(name) if name == "gone"));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure(
            "tmux",
            &["new-session", "-d", "-s", "work", "bash"],
            "duplicate session: work".to_string(),
        );
        match err {
            StoreError::CommandFailed { command, stderr } => {
                assert_eq!(command, "tmux new-session -d -s work bash");
                assert_eq!(stderr, "duplicate session: work");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_server_detection() {
        let err = StoreError::CommandFailed {
            command: "tmux list-sessions".to_string(),
            stderr: "no server running on /tmp/tmux-1000/default".to_string(),
        };
        assert!(is_no_server(&err));

        let err = StoreError::CommandFailed {
            command: "tmux list-sessions".to_string(),
            stderr: "unknown option".to_string(),
        };
        assert!(!is_no_server(&err));
    }

    #[tokio::test]
    async fn test_missing_binary_not_available() {
        let store = TmuxStore::new("tmux-relay-no-such-binary");
        let result = store.check_available().await;
        assert!(matches!(result, Err(StoreError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_list_is_io_error() {
        let store = TmuxStore::new("tmux-relay-no-such-binary");
        let result = store.list().await;
        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
