use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub client_origins: Vec<String>,
    pub notification_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("ATRIUM_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ATRIUM_JWT_SECRET is unset or still a placeholder; it must match the token issuer's secret");
        }

        let port = match get("ATRIUM_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("ATRIUM_PORT is not a port number: {raw:?}"))?,
            None => 3000,
        };

        let notification_sweep_secs = get("ATRIUM_NOTIFICATION_SWEEP_SECS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(3600);

        let client_origins = get("ATRIUM_CLIENT_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            jwt_secret,
            db_path: get("ATRIUM_DB_PATH").unwrap_or_else(|| "atrium.db".into()).into(),
            host: get("ATRIUM_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            client_origins,
            notification_sweep_secs,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("ATRIUM_JWT_SECRET", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("atrium.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.notification_sweep_secs, 3600);
        assert!(config.client_origins.is_empty());
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn refuses_missing_or_placeholder_secret() {
        assert!(load(&[]).is_err());
        assert!(load(&[("ATRIUM_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(load(&[("ATRIUM_JWT_SECRET", "   ")]).is_err());
    }

    #[test]
    fn parses_overrides() {
        let config = load(&[
            ("ATRIUM_JWT_SECRET", "s3cr3t-for-tests"),
            ("ATRIUM_PORT", "8080"),
            ("ATRIUM_CLIENT_ORIGINS", "https://a.example, ,https://b.example"),
            ("ATRIUM_NOTIFICATION_SWEEP_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.client_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.notification_sweep_secs, 3600);

        assert!(load(&[("ATRIUM_JWT_SECRET", "s3cr3t-for-tests"), ("ATRIUM_PORT", "http")]).is_err());
    }
}
