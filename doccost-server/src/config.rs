//! Server configuration

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// DocCost server command line arguments
#[derive(Debug, Parser)]
#[command(name = "doccost-server")]
#[command(about = "Web calculator and JSON API for document database cost estimates")]
pub struct Args {
    /// Address to listen on for HTTP requests
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory holding one sub-directory of JSON schemas per database
    #[arg(short, long, default_value = "schemas")]
    pub schemas: PathBuf,

    /// Settings file (JSON); built-in defaults when omitted
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Schemas directory
    pub schemas_dir: PathBuf,
    pub settings_file: Option<PathBuf>,
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            http_addr: args.listen,
            schemas_dir: args.schemas.clone(),
            settings_file: args.settings.clone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            schemas_dir: PathBuf::from("schemas"),
            settings_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_match_config() {
        let args = Args::parse_from(["doccost-server"]);
        let config = ServerConfig::from(&args);
        let default = ServerConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.schemas_dir, default.schemas_dir);
        assert!(config.settings_file.is_none());
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "doccost-server",
            "--listen",
            "127.0.0.1:3000",
            "--schemas",
            "/tmp/schemas",
            "--settings",
            "costs.json",
        ]);
        let config = ServerConfig::from(&args);
        assert_eq!(config.http_addr.port(), 3000);
        assert_eq!(config.schemas_dir, PathBuf::from("/tmp/schemas"));
        assert_eq!(config.settings_file, Some(PathBuf::from("costs.json")));
    }
}
