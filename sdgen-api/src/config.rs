use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Serialize)]
struct RawConfig {
    api_key: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_https_port")]
    https_port: u16,
    https_cert_path: Option<PathBuf>,
    #[serde(default)]
    http_only: bool,
    #[serde(default)]
    mock_sd: bool,
    #[serde(default)]
    mock_gen_s: f64,
    #[serde(default = "default_user_dir")]
    user_dir: PathBuf,
    #[serde(default = "default_model_dir")]
    model_dir: PathBuf,
    #[serde(default = "default_acme_dir")]
    acme_dir: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_http_port() -> u16 {
    80
}
fn default_https_port() -> u16 {
    443
}
fn default_user_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_model_dir() -> PathBuf {
    PathBuf::from("./stable-diffusion-v1-4")
}
fn default_acme_dir() -> PathBuf {
    PathBuf::from("/var/www/.well-known")
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub host: std::net::IpAddr,
    pub http_port: u16,
    pub https_port: u16,
    /// Directory holding `fullchain.pem` and `privkey.pem`.
    pub https_cert_path: Option<PathBuf>,
    /// Serve the API over plaintext HTTP only, without the ACME side server.
    pub http_only: bool,
    /// Skip model loading and answer with synthetic single-color images.
    pub mock_sd: bool,
    pub mock_gen_s: f64,
    /// Root under which `users/<id>/images/` is created.
    pub user_dir: PathBuf,
    pub model_dir: PathBuf,
    pub acme_dir: PathBuf,
}

impl Config {
    pub fn read(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(Error::ConfigReadFailed)?;

        let config: RawConfig =
            serde_yaml::from_slice(&data).map_err(Error::ConfigDeserializeFailed)?;

        Self::from_raw(config)
    }

    fn from_raw(config: RawConfig) -> Result<Self> {
        let api_key = env::var("SDGEN_API_KEY").ok().unwrap_or(config.api_key);

        let host = env::var("SDGEN_HOST").ok().unwrap_or(config.host);
        let host = host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::InvalidIp(e.to_string()))?;

        let http_port = env_port("SDGEN_HTTP_PORT")?.unwrap_or(config.http_port);
        let https_port = env_port("SDGEN_HTTPS_PORT")?.unwrap_or(config.https_port);

        let https_cert_path = env::var("SDGEN_HTTPS_CERT_PATH")
            .ok()
            .map(PathBuf::from)
            .or(config.https_cert_path);

        let http_only = env_flag("SDGEN_HTTP_ONLY").unwrap_or(config.http_only);
        let mock_sd = env_flag("SDGEN_MOCK_SD").unwrap_or(config.mock_sd);

        let mock_gen_s = env::var("SDGEN_MOCK_GEN_S")
            .ok()
            .and_then(|secs| secs.parse().ok())
            .unwrap_or(config.mock_gen_s);

        let user_dir = env::var("SDGEN_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(config.user_dir);
        let model_dir = env::var("SDGEN_MODEL_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(config.model_dir);
        let acme_dir = env::var("SDGEN_ACME_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(config.acme_dir);

        if !http_only && https_cert_path.is_none() {
            return Err(Error::MissingCertificate);
        }

        Ok(Self {
            api_key,
            host,
            http_port,
            https_port,
            https_cert_path,
            http_only,
            mock_sd,
            mock_gen_s,
            user_dir,
            model_dir,
            acme_dir,
        })
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.mock_gen_s).unwrap_or_default()
    }
}

fn env_port(name: &str) -> Result<Option<u16>> {
    match env::var(name) {
        Ok(port) => port
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidPort(port)),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v == "true" || v == "1")
}
