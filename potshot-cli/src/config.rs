use potshot_core::{CoreError, GameConfig, Network, Result};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("potshot")
}

/// Read `config.json` from the data directory, writing a template there on
/// first use.
pub async fn load_or_init(data_dir: &Path) -> Result<GameConfig> {
    let path = data_dir.join(CONFIG_FILE);

    if !path.exists() {
        let template = GameConfig::new(Network::Local);
        let content = serde_json::to_string_pretty(&template)?;
        tokio::fs::write(&path, content).await?;
        return Err(CoreError::config(format!(
            "Wrote a template to {}; add at least one wager context and run again",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let config: GameConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Remember `name` as the active context for later runs.
pub async fn save_active_context(data_dir: &Path, name: &str) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let content = tokio::fs::read_to_string(&path).await?;
    let mut config: GameConfig = serde_json::from_str(&content)?;
    config.active_context = name.to_string();
    config.validate()?;
    tokio::fs::write(&path, serde_json::to_string_pretty(&config)?).await?;
    Ok(())
}
