use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Item key namespace, e.g. `plugwatch[voltage]`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Device CLI command line, shell-split before use.
    #[serde(default = "default_plug_cmd")]
    pub plug_cmd: String,
    /// Sender command line, shell-split before use.
    #[serde(default = "default_sender_cmd")]
    pub sender_cmd: String,
    /// Per-family model table; replaces the built-in table when present.
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConf {
    /// Trailing lines of the info output that form the parseable payload.
    pub info_lines: usize,
    /// Extra metrics exclusive to this family, as a `field[:alias]` list.
    pub extra: Option<String>,
}

fn default_namespace() -> String {
    "plugwatch".to_string()
}

fn default_plug_cmd() -> String {
    "hs100".to_string()
}

fn default_sender_cmd() -> String {
    "zabbix_sender".to_string()
}

fn default_models() -> BTreeMap<String, ModelConf> {
    let mut models = BTreeMap::new();
    models.insert("HS100".to_string(), ModelConf { info_lines: 1, extra: None });
    models.insert(
        "HS110".to_string(),
        ModelConf {
            info_lines: 2,
            extra: Some("latitude_i:latitude_int,longitude_i:longitude_int".to_string()),
        },
    );
    models.insert(
        "KP115".to_string(),
        ModelConf { info_lines: 2, extra: Some("ntc_state,obd_src".to_string()) },
    );
    models.insert(
        "HS300".to_string(),
        ModelConf { info_lines: 4, extra: Some("child_num".to_string()) },
    );
    models
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            plug_cmd: default_plug_cmd(),
            sender_cmd: default_sender_cmd(),
            models: default_models(),
        }
    }
}

pub fn load_config() -> Config {
    let path = std::env::var("PLUGWATCH_CONFIG").unwrap_or_else(|_| "plugwatch.yaml".into());
    if Path::new(&path).exists() {
        let txt = std::fs::read_to_string(&path).unwrap_or_default();
        if txt.trim().is_empty() {
            return Config::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("config {} invalid: {}, falling back to defaults", path, e);
            Config::default()
        })
    } else {
        debug!("no {}, using built-in defaults", path);
        Config::default()
    }
}
