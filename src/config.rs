use std::path::PathBuf;

const HISTORY_FILE: &str = ".jobsh_history";
const DEFAULT_PROMPT: &str = "# ";

/// Shell settings, read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Line-editor history file.
    pub history: PathBuf,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        let history = dirs::home_dir()
            .map(|home| home.join(HISTORY_FILE))
            .unwrap_or_else(|| PathBuf::from(HISTORY_FILE));
        Config {
            history,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// `JOBSH_HISTORY` and `JOBSH_PROMPT` override the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        if let Some(path) = var("JOBSH_HISTORY").filter(|p| !p.is_empty()) {
            config.history = PathBuf::from(path);
        }
        if let Some(prompt) = var("JOBSH_PROMPT") {
            config.prompt = prompt;
        }
        config
    }
}
