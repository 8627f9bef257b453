//! rigflow configuration
//!
//! Locates and parses the cluster file. The parsed structure is handed to the
//! orchestrator as-is; semantic validation happens elsewhere.

pub mod cluster;
pub mod error;

pub use cluster::{
    BastionConfig, ClusterConfig, HostConfig, MaintenanceSettings, OrchestrationSettings, Role,
    TransportSettings,
};
pub use error::*;

use std::path::PathBuf;

/// Environment variable pointing directly at a cluster file
pub const CONFIG_ENV: &str = "RIGFLOW_CONFIG";

const CANDIDATES: [&str; 3] = ["cluster.local.yml", "cluster.yml", "cluster.yaml"];

/// rigflowの設定ディレクトリを取得 (無ければ作成)
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("rigflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// クラスタ定義ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 RIGFLOW_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: cluster.local.yml, cluster.yml, cluster.yaml
/// 3. ~/.config/rigflow/cluster.yml (グローバル設定)
pub fn find_cluster_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    // 2. カレントディレクトリで検索
    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. グローバル設定ファイル (~/.config/rigflow/cluster.yml)
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("rigflow").join("cluster.yml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ClusterFileNotFound)
}

/// クラスタ定義ファイルを探して読み込む
pub fn load_cluster() -> Result<ClusterConfig> {
    let path = find_cluster_file()?;
    ClusterConfig::load(&path)
}
