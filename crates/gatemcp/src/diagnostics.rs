//! Operator-facing remediation output for startup failures.
//!
//! Validation and startup errors are common during first-time setup, so they
//! are reported with a structured help block naming the rule violated and how
//! to fix it, not just the raw error.

use tracing::error;

use crate::error::GateError;

/// Broad classes of configuration validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// `base_url` points outside the loopback range in stdio mode
    BaseUrl,
    /// Stdio transport enabled without the required fields
    Stdio,
    /// Anything else in the config file
    General,
}

/// Classify a configuration error by the key it names.
pub fn classify(err: &GateError) -> ValidationKind {
    match err {
        GateError::Config { key: Some(key), .. } if key == "base_url" => ValidationKind::BaseUrl,
        GateError::Config { key: Some(key), .. } if key.starts_with("stdio") => {
            ValidationKind::Stdio
        }
        _ => ValidationKind::General,
    }
}

/// Log a configuration validation failure with remediation guidance.
///
/// `context` names where the bad value came from ("config_load" or
/// "stdio_flag") so the suggestions can match.
pub fn report_config_error(err: &GateError, context: &str) {
    error!("configuration validation failed: {err}");
    match classify(err) {
        ValidationKind::BaseUrl => base_url_help(context),
        ValidationKind::Stdio => stdio_help(),
        ValidationKind::General => general_help(),
    }
}

fn base_url_help(context: &str) {
    error!("base_url configuration issue:");
    error!("  in stdio transport mode base_url must point to a local address.");
    error!("  valid local addresses:");
    error!("    - localhost");
    error!("    - 127.x.x.x (any IP in 127.0.0.0/8)");
    error!("    - ::1 (IPv6 loopback)");
    error!("    - 0.0.0.0 (any interface)");
    error!("  example valid base_urls:");
    error!("    - http://localhost:8000");
    error!("    - http://127.0.0.1:8000");
    error!("    - https://[::1]:8443");
    if context == "stdio_flag" {
        error!("  fixes:");
        error!("    1. point base_url at localhost in config.yaml");
        error!("    2. drop the --stdio flag to keep SSE mode for remote servers");
        error!("    3. set transport_mode: \"sse\" for remote connections");
    } else {
        error!("  fixes:");
        error!("    1. point base_url at localhost in config.yaml");
        error!("    2. use transport_mode: \"sse\" for remote MCP servers");
        error!("    3. make sure the MCP server runs locally in stdio mode");
    }
}

fn stdio_help() {
    error!("stdio configuration issue:");
    error!("  stdio transport mode requires:");
    error!("    - stdio.enabled: true");
    error!("    - stdio.user_command: \"<command that runs the MCP server>\"");
    error!("    - base_url pointing at localhost");
    error!("  example:");
    error!("    transport_mode: \"stdio\"");
    error!("    base_url: \"http://localhost:8000\"");
    error!("    stdio:");
    error!("      enabled: true");
    error!("      user_command: \"npx @modelcontextprotocol/server-filesystem\"");
    error!("  alternatives:");
    error!("    - transport_mode: \"sse\" for remote servers");
    error!("    - the --demo flag for quick testing");
}

fn general_help() {
    error!("configuration help:");
    error!("  common issues:");
    error!("    - missing required fields in config.yaml");
    error!("    - invalid YAML syntax");
    error!("    - mismatched transport mode settings");
    error!("  check the example config shipped with the repository,");
    error!("  or start with the --demo flag for a known-good setup.");
}

/// Log a startup failure with hints specific to the failing component.
pub fn report_startup_error(err: &GateError, component: &str) {
    error!("failed to start {component}: {err}");
    match component {
        "subprocess" => {
            error!("subprocess startup help:");
            error!("  - ensure Node.js and npm/npx are installed");
            error!("  - check that the MCP server command is valid");
            error!("  - try running the command manually first");
        }
        "jwks" => {
            error!("JWKS fetch help:");
            error!("  - check network connectivity");
            error!("  - verify the jwks_url is correct");
            error!("  - ensure the identity provider is reachable");
        }
        "server" => {
            error!("server startup help:");
            error!("  - check whether the listen port is already in use");
            error!("  - verify the process may bind that interface");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_errors_are_classified() {
        let err = GateError::config_with_key("must be local", "base_url");
        assert_eq!(classify(&err), ValidationKind::BaseUrl);
    }

    #[test]
    fn stdio_errors_are_classified() {
        let err = GateError::config_with_key("enable it", "stdio.enabled");
        assert_eq!(classify(&err), ValidationKind::Stdio);
    }

    #[test]
    fn other_errors_fall_through_to_general() {
        assert_eq!(classify(&GateError::config("bad yaml")), ValidationKind::General);
        assert_eq!(classify(&GateError::network("boom")), ValidationKind::General);
    }
}
