use std::path::Path;

use config::{Config, File, FileFormat};
use serde::Deserialize;
use url::Url;

use crate::{domain::notebook::NotebookPolicy, logger::LoggerFormat, Args};

#[derive(Deserialize, Debug)]
pub(crate) struct ApplicationConfig {
    pub port: u16,
    pub base_url: Url,
    #[serde(default)]
    pub log_format: LoggerFormat,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub directory: DirectoryConfig,
    pub cluster: ClusterConfig,
    pub mail: MailConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SessionConfig {
    pub secure_cookie: bool,
    pub inactivity_timeout_minutes: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub revoke_url: Url,
    pub logout_url: Url,
    pub scopes: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DirectoryConfig {
    pub url: Url,
    pub token: String,
    pub portal_group: String,
    pub root_group: String,
    #[serde(default)]
    pub protected_groups: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    pub url: Url,
    pub token: String,
    pub namespace: String,
    pub domain: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub policy: NotebookPolicy,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MailConfig {
    pub url: Url,
    pub api_key: String,
    pub sender: String,
    pub staff_email: String,
}

pub(super) fn load_config(args: Args) -> anyhow::Result<ApplicationConfig> {
    let config_file_path = if let Some(path_override) = args.config {
        path_override
    } else {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("af-portal")?;

        let user_config_dir = xdg_dirs.get_config_home();
        if !user_config_dir.exists() {
            std::fs::create_dir_all(&user_config_dir)?;
        }

        let config_file_path = user_config_dir.join("portal_config.toml");
        if !config_file_path.exists() {
            write_default_config_file(&config_file_path)?;
        }

        config_file_path
    };

    let config: ApplicationConfig = Config::builder()
        .set_default("port", 5000)?
        .set_default("session.secure_cookie", true)?
        .set_default("session.inactivity_timeout_minutes", 8 * 60)?
        .add_source(File::from(config_file_path).format(FileFormat::Toml))
        .set_override_option("port", args.port.map(|port| port.to_string()))?
        .set_override_option("base_url", args.base_url)?
        .build()?
        .try_deserialize()?;

    Ok(config)
}

fn write_default_config_file(path: &Path) -> anyhow::Result<()> {
    let default_config_content = include_str!("../static/default_config.toml");
    std::fs::write(path, default_config_content)?;
    Ok(())
}
