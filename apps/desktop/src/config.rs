use std::fs;

use serde::Deserialize;
use shared::domain::DEFAULT_COLLECTION;

pub const SETTINGS_FILE: &str = "desktop.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: Option<String>,
    pub collection: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    collection: Option<String>,
}

pub fn load_settings() -> ClientSettings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `desktop.toml`, then environment. Command-line flags are
/// applied on top by the caller.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some(file_cfg) = file_contents.and_then(|raw| toml::from_str::<FileSettings>(raw).ok()) {
        if let Some(v) = file_cfg.server_url {
            settings.server_url = Some(v);
        }
        if let Some(v) = file_cfg.collection {
            settings.collection = v;
        }
    }

    if let Some(v) = env("TASKS_SERVER_URL") {
        settings.server_url = Some(v);
    }
    if let Some(v) = env("APP__COLLECTION") {
        settings.collection = v;
    }

    settings
}
