//! CLI argument definitions
//!
//! Defines the clap arguments for the runner.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::config::RunnerConfig;
use crate::runner::RunParams;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Location of feature file(s); searched for the .wire config
    #[arg(long, short = 'f', default_value = ".")]
    pub features: PathBuf,

    /// Cucumber executable
    #[arg(long, short = 'c', default_value = "cucumber")]
    pub cucumber: String,

    /// Additional cucumber options (surround in quotes for multiple)
    #[arg(long, short = 'o', default_value = "", allow_hyphen_values = true)]
    pub options: String,

    /// Explicit .wire config file instead of searching the feature path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds cucumber may run before it is terminated (default from config, 10)
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Verbose output
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl RunArgs {
    /// Merge with file configuration; flags win
    pub fn into_params(self, config: &RunnerConfig) -> RunParams {
        let mut params = RunParams::from_config(config, self.features);
        params.cucumber = self.cucumber;
        params.options = self.options;
        params.wire_config = self.config;
        if let Some(secs) = self.timeout {
            params.timeout = Duration::from_secs(secs);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["runner"]).unwrap();
        assert_eq!(cli.args.features, PathBuf::from("."));
        assert_eq!(cli.args.cucumber, "cucumber");
        assert_eq!(cli.args.options, "");
        assert!(!cli.args.verbose);
    }

    #[test]
    fn test_options_may_start_with_dashes() {
        let cli = TestCli::try_parse_from(["runner", "-o", "--strict --format progress", "-v"])
            .unwrap();
        assert_eq!(cli.args.options, "--strict --format progress");
        assert!(cli.args.verbose);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = TestCli::try_parse_from(["runner", "-f", "features", "-t", "90", "-c", "bundle"])
            .unwrap();
        let params = cli.args.into_params(&RunnerConfig::default());

        assert_eq!(params.feature_path, PathBuf::from("features"));
        assert_eq!(params.cucumber, "bundle");
        assert_eq!(params.timeout, Duration::from_secs(90));
        assert_eq!(params.kill_grace, Duration::from_secs(2));
    }
}
