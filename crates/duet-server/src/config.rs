use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server settings, read from `DUET_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub allow_mock_login: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = var("DUET_HOST", "0.0.0.0");
        let port: u16 = var("DUET_PORT", "3000")
            .parse()
            .context("DUET_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let allow_mock_login = matches!(
            var("DUET_ALLOW_MOCK_LOGIN", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        Ok(Self {
            jwt_secret: var("DUET_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("DUET_DB_PATH", "duet.db")),
            addr,
            upload_dir: PathBuf::from(var("DUET_UPLOAD_DIR", "./uploads")),
            allow_mock_login,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.db_path, PathBuf::from("duet.db"));
        assert_eq!(config.jwt_secret, "dev-secret-change-me");
        assert!(!config.allow_mock_login);
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DUET_HOST", "127.0.0.1"),
            ("DUET_PORT", "8080"),
            ("DUET_ALLOW_MOCK_LOGIN", "TRUE"),
            ("DUET_UPLOAD_DIR", "/var/duet"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.upload_dir, PathBuf::from("/var/duet"));
        assert!(config.allow_mock_login);
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(Config::from_lookup(lookup(&[("DUET_PORT", "http")])).is_err());
    }
}
