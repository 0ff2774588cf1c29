use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VigilConfig {
    pub port: u16,
    /// Seconds without a heartbeat before a device is considered offline.
    pub timeout_seconds: u64,
    /// Seconds between two liveness sweeps. Decoupled from the timeout so
    /// alarm latency can be tuned independently of poll cost.
    pub check_interval_seconds: u64,
    pub push: Option<PushConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PushConf {
    pub url: String,
    pub chunk_size: usize,
    pub request_timeout_seconds: u64,
}

impl Default for PushConf {
    fn default() -> Self {
        Self {
            url: "https://exp.host/--/api/v2/push/send".into(),
            chunk_size: 100,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            timeout_seconds: 120,
            check_interval_seconds: 30,
            push: Some(PushConf::default()),
        }
    }
}

impl VigilConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_seconds)
    }

    pub fn push_conf(&self) -> PushConf {
        self.push.clone().unwrap_or_default()
    }
}

pub async fn load_config() -> VigilConfig {
    let path = std::env::var("VIGIL_KERNEL_CONFIG").unwrap_or_else(|_| "vigil.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() { return VigilConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] invalid config: {e}");
            VigilConfig::default()
        })
    } else {
        eprintln!("[kernel] no vigil.yaml, using default config");
        VigilConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadence() {
        let cfg = VigilConfig::default();
        assert_eq!(cfg.timeout_seconds, 120);
        assert_eq!(cfg.check_interval_seconds, 30);
        assert_eq!(cfg.push_conf().chunk_size, 100);
    }

    #[test]
    fn parses_partial_yaml_with_push_defaults() {
        let cfg: VigilConfig =
            serde_yaml::from_str("port: 8080\ntimeout_seconds: 60\ncheck_interval_seconds: 15\n")
                .unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.push.is_none());
        assert_eq!(cfg.push_conf().url, PushConf::default().url);
    }
}
