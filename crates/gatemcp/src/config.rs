//! YAML configuration model, defaulting, and validation.
//!
//! The file named by `CONFIG_FILE` (default `./config.yaml`) is read once at
//! startup; after [`Config::load`] returns, the configuration is immutable
//! apart from CLI overrides applied before the server starts.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::GateError;

/// Default proxy listen port.
const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default upstream MCP port (also the bridge port in stdio mode).
const DEFAULT_UPSTREAM_PORT: u16 = 8000;

/// Default upstream HTTP timeout in seconds.
const DEFAULT_TIMEOUT_SECONDS: u64 = 15;

/// Default upstream SSE path.
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// Default upstream messages path.
pub const DEFAULT_MESSAGES_PATH: &str = "/messages";

/// How the upstream MCP server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Upstream is an HTTP/SSE server
    #[default]
    Sse,
    /// Upstream speaks stdio and runs as a supervised child bridged to HTTP
    Stdio,
}

/// Which provider policy serves the OAuth surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Self-hosted identity provider configured under `default`
    #[default]
    Default,
    /// Hosted vendor sandbox org (selected by `--demo`)
    Demo,
    /// Hosted vendor org from config (selected by `--hosted`)
    Hosted,
}

/// Proxy endpoint paths, shared with the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sse: String,
    pub messages: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sse: DEFAULT_SSE_PATH.to_string(),
            messages: DEFAULT_MESSAGES_PATH.to_string(),
        }
    }
}

/// Stdio-bridge child process settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioConfig {
    pub enabled: bool,
    /// The MCP server command the bridge wraps
    pub user_command: String,
    pub work_dir: Option<String>,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries added to the child environment
    pub env: Vec<String>,
}

/// CORS policy applied by the router wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

/// Credentials for a hosted identity-provider organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    pub org_name: String,
    pub client_id: String,
    pub client_secret: String,
}

/// A query or body parameter injected into forwarded auth requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamConfig {
    pub name: String,
    pub value: String,
}

/// Overrides for the synthesized authorization-server metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub issuer: Option<String>,
    pub jwks_uri: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub registration_endpoint: Option<String>,
    pub response_types_supported: Option<Vec<String>>,
    pub grant_types_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

/// Per-endpoint request/response shaping for the default provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Well-known metadata overrides
    pub response: Option<ResponseConfig>,
    /// Query parameters merged into `/authorize` redirects
    #[serde(rename = "addQueryParams")]
    pub add_query_params: Vec<ParamConfig>,
    /// Body parameters merged into `/token` and `/register` forwards
    #[serde(rename = "addBodyParams")]
    pub add_body_params: Vec<ParamConfig>,
}

/// Self-hosted identity provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultIdpConfig {
    pub base_url: String,
    pub jwks_url: String,
    pub path: HashMap<String, PathConfig>,
}

/// Full proxy configuration.
///
/// Read-only after startup; handlers receive it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the proxy binds
    pub listen_port: u16,
    /// Origin of the upstream MCP HTTP endpoint
    pub base_url: String,
    /// Upstream port, used to synthesize `base_url` and fed to the bridge
    pub port: u16,
    /// Public hostname as clients see the proxy (`EXTERNAL_HOST` env wins)
    pub external_host: Option<String>,
    /// Upstream HTTP timeout in seconds
    pub timeout_seconds: u64,
    pub mode: ProviderMode,
    pub transport_mode: TransportMode,
    pub paths: PathsConfig,
    pub stdio: StdioConfig,
    pub cors: CorsConfig,
    pub demo: OrgConfig,
    pub hosted: OrgConfig,
    #[serde(rename = "default")]
    pub default_idp: DefaultIdpConfig,

    /// Effective authorization server origin, derived from the mode
    #[serde(skip)]
    pub auth_server_base_url: String,
    /// Effective JWKS endpoint, derived from the mode
    #[serde(skip)]
    pub jwks_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            base_url: String::new(),
            port: DEFAULT_UPSTREAM_PORT,
            external_host: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            mode: ProviderMode::default(),
            transport_mode: TransportMode::default(),
            paths: PathsConfig::default(),
            stdio: StdioConfig::default(),
            cors: CorsConfig::default(),
            demo: OrgConfig::default(),
            hosted: OrgConfig::default(),
            default_idp: DefaultIdpConfig::default(),
            auth_server_base_url: String::new(),
            jwks_url: String::new(),
        }
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GateError::config(format!(
                "cannot read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text, applying defaults and validating.
    pub fn from_yaml(raw: &str) -> Result<Self, GateError> {
        let mut cfg: Config = serde_yaml::from_str(raw)
            .map_err(|e| GateError::config(format!("invalid YAML: {e}")))?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.timeout_seconds == 0 {
            self.timeout_seconds = DEFAULT_TIMEOUT_SECONDS;
        }
        if self.port == 0 {
            self.port = DEFAULT_UPSTREAM_PORT;
        }
        if self.listen_port == 0 {
            self.listen_port = DEFAULT_LISTEN_PORT;
        }
    }

    /// Check mode-dependent invariants and fill derived defaults.
    ///
    /// Called on load and again after CLI overrides change the transport
    /// mode.
    pub fn validate(&mut self) -> Result<(), GateError> {
        if self.transport_mode == TransportMode::Stdio {
            if !self.stdio.enabled {
                return Err(GateError::config_with_key(
                    "stdio.enabled must be true in stdio transport mode",
                    "stdio.enabled",
                ));
            }
            if self.stdio.user_command.is_empty() {
                return Err(GateError::config_with_key(
                    "stdio.user_command is required in stdio transport mode",
                    "stdio.user_command",
                ));
            }
        }

        if self.paths.sse.is_empty() {
            self.paths.sse = DEFAULT_SSE_PATH.to_string();
        }
        if self.paths.messages.is_empty() {
            self.paths.messages = DEFAULT_MESSAGES_PATH.to_string();
        }
        for path in [&self.paths.sse, &self.paths.messages] {
            if !path.starts_with('/') {
                return Err(GateError::config_with_key(
                    format!("endpoint path must start with '/', got: {path}"),
                    "paths",
                ));
            }
        }

        if self.base_url.is_empty() {
            self.base_url = format!("http://localhost:{}", self.port);
        }

        // The loopback restriction keeps a stdio bridge from being pointed at
        // a remote host while the proxy believes it owns the child.
        if self.transport_mode == TransportMode::Stdio {
            validate_local_url(&self.base_url)?;
        }

        Ok(())
    }

    /// Full bridge command line for stdio mode.
    ///
    /// The user command is embedded quoted; on Windows the shell needs inner
    /// quotes escaped as well.
    pub fn exec_command(&self) -> String {
        if self.stdio.user_command.is_empty() {
            return String::new();
        }
        let user_command = if cfg!(windows) {
            self.stdio.user_command.replace('"', "\\\"")
        } else {
            self.stdio.user_command.clone()
        };
        format!(
            "npx -y supergateway --header X-Accel-Buffering:no --stdio \"{}\" --port {} --baseUrl {} --ssePath {} --messagePath {}",
            user_command, self.port, self.base_url, self.paths.sse, self.paths.messages
        )
    }
}

/// Ensure a URL points at a loopback-class address.
fn validate_local_url(url_str: &str) -> Result<(), GateError> {
    if url_str.is_empty() {
        return Err(GateError::config_with_key("base_url cannot be empty", "base_url"));
    }

    let parsed = Url::parse(url_str)
        .map_err(|e| GateError::config_with_key(format!("invalid base_url: {e}"), "base_url"))?;

    let local = match parsed.host() {
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Some(Host::Ipv6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Some(Host::Domain(name)) => is_local_hostname(name),
        None => false,
    };

    if !local {
        return Err(GateError::config_with_key(
            format!(
                "base_url must point to a local address (localhost, 127.x.x.x, ::1, 0.0.0.0) \
                 when using stdio transport mode, got: {}",
                parsed.host_str().unwrap_or(url_str)
            ),
            "base_url",
        ));
    }
    Ok(())
}

fn is_local_hostname(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if matches!(name.as_str(), "localhost" | "localhost.localdomain" | "local") {
        return true;
    }
    // Numeric hosts can reach here as domains when unbracketed
    match name.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(base_url: &str) -> Config {
        Config {
            base_url: base_url.to_string(),
            transport_mode: TransportMode::Stdio,
            stdio: StdioConfig {
                enabled: true,
                user_command: "node mcp.js".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn yaml_defaults_are_applied() {
        let cfg = Config::from_yaml("listen_port: 9090\n").unwrap();
        assert_eq!(cfg.listen_port, 9090);
        assert_eq!(cfg.timeout_seconds, 15);
        assert_eq!(cfg.transport_mode, TransportMode::Sse);
        assert_eq!(cfg.paths.sse, "/sse");
        assert_eq!(cfg.paths.messages, "/messages");
        assert_eq!(cfg.base_url, "http://localhost:8000");
    }

    #[test]
    fn base_url_synthesized_from_port() {
        let cfg = Config::from_yaml("port: 9000\n").unwrap();
        assert_eq!(cfg.base_url, "http://localhost:9000");
    }

    #[test]
    fn full_yaml_round_trip() {
        let cfg = Config::from_yaml(
            r#"
listen_port: 8080
base_url: "http://localhost:8000"
mode: default
cors:
  allowed_origins: ["http://localhost:5173"]
  allowed_methods: ["GET", "POST", "OPTIONS"]
  allowed_headers: ["Authorization", "Content-Type"]
  allow_credentials: true
default:
  base_url: "https://idp.example.com"
  jwks_url: "https://idp.example.com/jwks"
  path:
    "/authorize":
      addQueryParams:
        - name: "audience"
          value: "mcp-api"
"#,
        )
        .unwrap();

        assert_eq!(cfg.mode, ProviderMode::Default);
        assert_eq!(cfg.default_idp.base_url, "https://idp.example.com");
        assert!(cfg.cors.allow_credentials);
        let authorize = cfg.default_idp.path.get("/authorize").unwrap();
        assert_eq!(authorize.add_query_params[0].name, "audience");
    }

    #[test]
    fn stdio_accepts_loopback_base_urls() {
        for url in [
            "http://localhost:8000",
            "http://127.0.0.1:8000",
            "http://127.5.4.3:8000",
            "http://0.0.0.0:8000",
            "https://[::1]:8443",
        ] {
            let mut cfg = stdio_config(url);
            assert!(cfg.validate().is_ok(), "expected {url} to be accepted");
        }
    }

    #[test]
    fn stdio_rejects_remote_base_urls() {
        for url in [
            "http://example.com:8000",
            "http://192.168.1.100:8000",
            "http://api.service.com",
        ] {
            let mut cfg = stdio_config(url);
            let err = cfg.validate().unwrap_err();
            assert!(
                matches!(&err, GateError::Config { key: Some(k), .. } if k == "base_url"),
                "expected {url} to be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn sse_mode_allows_remote_base_urls() {
        let mut cfg = Config {
            base_url: "https://mcp.example.com".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stdio_requires_enabled_and_command() {
        let mut cfg = Config {
            transport_mode: TransportMode::Stdio,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            GateError::Config { key: Some(k), .. } if k == "stdio.enabled"
        ));

        cfg.stdio.enabled = true;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            GateError::Config { key: Some(k), .. } if k == "stdio.user_command"
        ));
    }

    #[test]
    fn exec_command_embeds_bridge_arguments() {
        let mut cfg = stdio_config("http://localhost:9000");
        cfg.port = 9000;
        cfg.validate().unwrap();

        let cmd = cfg.exec_command();
        assert!(cmd.starts_with("npx -y supergateway"));
        assert!(cmd.contains("--stdio \"node mcp.js\""));
        assert!(cmd.contains("--port 9000"));
        assert!(cmd.contains("--baseUrl http://localhost:9000"));
        assert!(cmd.contains("--ssePath /sse"));
        assert!(cmd.contains("--messagePath /messages"));
    }

    #[test]
    fn exec_command_empty_without_user_command() {
        let cfg = Config::default();
        assert!(cfg.exec_command().is_empty());
    }
}
