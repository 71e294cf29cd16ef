use boxdraw_core::{IdentityProvider, LotteryConfig, SessionIdentity, StaticIdentity};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub user: Option<String>,
    pub verbose: bool,
    pub lottery: LotteryConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("boxdraw"),
            user: None,
            verbose: false,
            lottery: LotteryConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("boxdraw.db")
    }

    /// `--user` if given, otherwise a fresh `User_xxxxxx` for this run.
    pub fn identity(&self) -> Arc<dyn IdentityProvider> {
        match self.user.as_deref().map(str::trim) {
            Some(user) if !user.is_empty() => Arc::new(StaticIdentity(user.to_string())),
            _ => Arc::new(SessionIdentity::generate()),
        }
    }

    pub fn log_filter(&self) -> String {
        let level = if self.verbose { "debug" } else { "info" };
        format!(
            "boxdraw={},boxdraw_lottery={},boxdraw_core={}",
            level, level, level
        )
    }
}
