//! Command-line flags.

use clap::Parser;

/// OAuth 2.0 authenticating reverse proxy for Model Context Protocol servers.
#[derive(Debug, Default, Parser)]
#[command(name = "gatemcp", version, about)]
pub struct Cli {
    /// Use the hosted demo provider (vendor sandbox organization)
    #[arg(long)]
    pub demo: bool,

    /// Use the hosted provider with the organization from config
    #[arg(long, conflicts_with = "demo")]
    pub hosted: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Force stdio transport mode (supervised bridge child process)
    #[arg(long)]
    pub stdio: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["gatemcp", "--stdio", "--debug"]);
        assert!(cli.stdio);
        assert!(cli.debug);
        assert!(!cli.demo);
    }

    #[test]
    fn demo_and_hosted_conflict() {
        assert!(Cli::try_parse_from(["gatemcp", "--demo", "--hosted"]).is_err());
    }
}
