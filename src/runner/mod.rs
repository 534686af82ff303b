//! Orchestration of one test run
//!
//! The order matters and is enforced here:
//! 1. Find the cucumber executable and the wire config (fail fast, nothing started)
//! 2. Bind the wire socket, synchronously
//! 3. Start accepting on a background task, without waiting for a client
//! 4. Run cucumber, which can now connect whenever it likes
//! 5. Shut the server down and wait for the accept task, on every path

pub mod cucumber;
pub mod supervisor;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::common::config::RunnerConfig;
use crate::common::Result;
use crate::wire::{self, AcceptOutcome, ServerHandle, ShutdownMode, StepEngine};

use cucumber::CucumberInvocation;
pub use supervisor::{RunStatus, SubprocessResult, TIMEOUT_EXIT_CODE};

/// Exit code for failures of the runner itself (config, executable, bind, spawn)
pub const INTERNAL_FAILURE_EXIT_CODE: i32 = 125;

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Feature file or directory; also where the `.wire` file is searched for
    pub feature_path: PathBuf,
    /// Test-runner executable name or path
    pub cucumber: String,
    /// Extra test-runner options, shell-quoted
    pub options: String,
    /// Explicit `.wire` file, skipping the search
    pub wire_config: Option<PathBuf>,
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub shutdown: ShutdownMode,
    pub environment: BTreeMap<String, String>,
}

impl RunParams {
    /// Parameters with defaults taken from `config`
    pub fn from_config(config: &RunnerConfig, feature_path: impl Into<PathBuf>) -> Self {
        Self {
            feature_path: feature_path.into(),
            cucumber: cucumber::DEFAULT_EXECUTABLE.to_string(),
            options: String::new(),
            wire_config: None,
            timeout: config.timeouts.cucumber(),
            kill_grace: config.timeouts.kill_grace(),
            shutdown: config.server.shutdown,
            environment: config.environment.clone(),
        }
    }
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run's exit status: always the test runner's, whatever the server did
    pub exit_code: i32,
    pub status: RunStatus,
    /// Combined test-runner output
    pub output: Vec<u8>,
    pub accept: AcceptOutcome,
}

/// Run cucumber against a wire server driven by `engine`
pub async fn execute(params: &RunParams, engine: Arc<dyn StepEngine>) -> Result<RunOutcome> {
    // Locate now so we can error out early if not found
    let executable = cucumber::find_executable(&params.cucumber)?;

    let wire_config = match &params.wire_config {
        Some(path) => path.clone(),
        None => wire::find_wire_config(&params.feature_path)?,
    };
    tracing::debug!("Using wire config {}", wire_config.display());
    let endpoint = wire::parse_wire_config(&wire_config)?;

    let invocation = CucumberInvocation::new(executable, &params.options, &params.feature_path)?
        .with_env(&params.environment);

    let mut server = wire::listen(&endpoint, params.shutdown)?;
    server.accept_once(engine);

    let result = run_cucumber(&server, &invocation, params.timeout, params.kill_grace).await;

    let accept = server.finish().await;
    tracing::debug!(?accept, "Wire server stopped");

    let result = result?;
    Ok(RunOutcome {
        exit_code: result.exit_code,
        status: result.status,
        output: result.output,
        accept,
    })
}

/// Run the test runner against an already-listening server
///
/// Taking the handle is what guarantees the socket is bound before the
/// runner can try to connect.
pub async fn run_cucumber(
    server: &ServerHandle,
    invocation: &CucumberInvocation,
    timeout: Duration,
    kill_grace: Duration,
) -> Result<SubprocessResult> {
    tracing::debug!(
        "Executing '{}' (wire server on {})",
        invocation.command_line(),
        server.local_address()
    );

    let result = supervisor::run(&invocation.to_spec(timeout, kill_grace)).await?;
    match result.status {
        RunStatus::Completed => {
            tracing::debug!("'{}' exited with code {}", invocation.command_line(), result.exit_code)
        }
        RunStatus::TimedOut => {
            tracing::warn!("Timeout executing '{}'", invocation.command_line())
        }
    }
    Ok(result)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::wire::DrainEngine;
    use crate::Error;

    fn params(feature_path: &std::path::Path) -> RunParams {
        RunParams::from_config(&RunnerConfig::default(), feature_path)
    }

    #[tokio::test]
    async fn test_missing_executable_fails_before_anything_else() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = params(dir.path());
        params.cucumber = "definitely-not-a-cucumber-binary".to_string();

        let err = execute(&params, Arc::new(DrainEngine)).await.unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_missing_wire_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = params(dir.path());
        params.cucumber = "sh".to_string();

        let err = execute(&params, Arc::new(DrainEngine)).await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_bind_failure_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        std::fs::write(
            dir.path().join("cucumber.wire"),
            format!("host: 127.0.0.1\nport: {}\n", port),
        )
        .unwrap();
        let marker = dir.path().join("ran");

        let mut params = params(dir.path());
        params.cucumber = "touch".to_string();
        params.options = marker.display().to_string();

        let err = execute(&params, Arc::new(DrainEngine)).await.unwrap_err();
        assert!(matches!(err, Error::Bind { .. }), "{err}");
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_runner_exit_code_is_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        std::fs::write(
            dir.path().join("cucumber.wire"),
            format!("host: 127.0.0.1\nport: {}\n", port),
        )
        .unwrap();

        // `sh -c 'exit 4' <feature dir>`: the feature path lands in $0
        let mut params = params(dir.path());
        params.cucumber = "sh".to_string();
        params.options = "-c 'echo $RUBY_IGNORE_CALLERS; exit 4'".to_string();

        let outcome = execute(&params, Arc::new(DrainEngine)).await.unwrap();
        assert_eq!(outcome.exit_code, 4);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(String::from_utf8_lossy(&outcome.output), "1\n");
        assert_eq!(outcome.accept, AcceptOutcome::Cancelled);
    }
}
