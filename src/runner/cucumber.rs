//! Building the `cucumber` command line

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

use super::supervisor::ProcessSpec;

/// Default test-runner executable
pub const DEFAULT_EXECUTABLE: &str = "cucumber";

/// Silences "THIS RUBY IMPLEMENTATION DOESN'T REPORT FILE AND LINE FOR PROCS"
const RUBY_IGNORE_CALLERS: (&str, &str) = ("RUBY_IGNORE_CALLERS", "1");

/// Locate the test-runner executable on PATH (or at an explicit path)
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| {
        let searched: Vec<String> = std::env::var_os("PATH")
            .map(|path| {
                std::env::split_paths(&path)
                    .map(|dir| dir.display().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Error::executable_not_found(name, &searched)
    })
}

/// A fully resolved `<executable> <options...> <feature-path>` invocation
#[derive(Debug, Clone)]
pub struct CucumberInvocation {
    pub executable: PathBuf,
    pub options: Vec<String>,
    pub feature_path: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl CucumberInvocation {
    /// `options` is split like a shell would, so quoted values survive
    pub fn new(executable: PathBuf, options: &str, feature_path: &Path) -> Result<Self> {
        let feature_path = feature_path
            .canonicalize()
            .unwrap_or_else(|_| feature_path.to_path_buf());

        let mut env = BTreeMap::new();
        env.insert(
            RUBY_IGNORE_CALLERS.0.to_string(),
            RUBY_IGNORE_CALLERS.1.to_string(),
        );

        Ok(Self {
            executable,
            options: split_options(options)?,
            feature_path,
            env,
        })
    }

    /// Add environment overrides; later values win
    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Directory the runner is started in: the feature directory itself, or
    /// the directory containing a single feature file
    pub fn working_dir(&self) -> PathBuf {
        if self.feature_path.is_dir() {
            self.feature_path.clone()
        } else {
            self.feature_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }

    /// The command line, for logs
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(self.options.iter().cloned());
        parts.push(self.feature_path.display().to_string());
        parts.join(" ")
    }

    pub fn to_spec(&self, timeout: Duration, kill_grace: Duration) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.executable, timeout)
            .args(self.options.iter().cloned())
            .args([self.feature_path.display().to_string()])
            .current_dir(self.working_dir())
            .kill_grace(kill_grace);
        for (key, value) in &self.env {
            spec = spec.env(key.clone(), value.clone());
        }
        spec
    }
}

/// Split an option string into words, honouring quotes and backslashes
pub fn split_options(options: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = options.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => match chars.next() {
                Some(escaped @ ('"' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                        in_word = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(Error::InvalidOptions(format!(
            "unterminated quote in '{}'",
            options
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
