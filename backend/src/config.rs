use std::path::PathBuf;

/// Process configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub api_key: String,
    /// Directory holding `circuit.json`, `proving_key.bin` and `pin.json`.
    pub artifact_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(lookup("ZKFLEX_DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let artifact_dir = lookup("ZKFLEX_ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("circuit"));

        Self {
            addr: lookup("ZKFLEX_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            // In production, this should be a strong secret from environment.
            api_key: lookup("ZKFLEX_API_KEY").unwrap_or_else(|| "dev-secret-key".to_string()),
            data_dir,
            artifact_dir,
        }
    }

    pub fn db_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.data_dir.join("zkflex.sqlite").to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.addr, "127.0.0.1:8080");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.artifact_dir, PathBuf::from("data").join("circuit"));
    }

    #[test]
    fn test_artifact_dir_follows_data_dir() {
        let env = HashMap::from([("ZKFLEX_DATA_DIR", "/var/lib/zkflex"), ("ZKFLEX_API_KEY", "s3cret")]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.artifact_dir, PathBuf::from("/var/lib/zkflex/circuit"));
        assert_eq!(config.api_key, "s3cret");
    }
}
