use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use triage_vision::cli::Cli;

const DEFAULT_LOG_FILTER: &str = "triage_vision=info";

fn main() -> Result<()> {
    // Logs go to stderr so `predict --json` output stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();
    cli.run()
}

/// RUST_LOG when set and valid, otherwise the crate at info.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_default() {
        let filter = log_filter(Some("triage_vision=debug"));
        assert_eq!(filter.to_string(), "triage_vision=debug");
    }

    #[test]
    fn test_default_when_unset_or_invalid() {
        assert_eq!(log_filter(None).to_string(), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some("triage_vision=loud")).to_string(), DEFAULT_LOG_FILTER);
    }
}
