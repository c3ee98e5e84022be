// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Upstream origin URL, e.g. http://localhost:8888
    pub upstream: Option<String>,

    /// Address the proxy itself listens on
    #[serde(default = "default_proxy_listen")]
    pub proxy_listen: String,

    /// Address the management (event stream) server listens on
    #[serde(default = "default_management_listen")]
    pub management_listen: String,
}

fn default_proxy_listen() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_management_listen() -> String {
    "127.0.0.1:8082".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            proxy_listen: default_proxy_listen(),
            management_listen: default_management_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Config {
    /// Load configuration from a TOML file:
    ///
    /// ```toml
    /// [general]
    /// upstream = "http://localhost:8888"
    /// proxy_listen = "127.0.0.1:8081"
    /// management_listen = "127.0.0.1:8082"
    /// ```
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }
}
