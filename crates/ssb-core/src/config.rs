use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{Role, UserId},
    errors::Error,
    Result,
};

/// Typed configuration, loaded once at startup and shared by handle.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub channel: String,
    pub admin_ids: Vec<i64>,

    // Storage / menus
    pub db_path: PathBuf,
    pub menus_path: PathBuf,

    // Health endpoint
    pub health_port: u16,

    // Completion service
    pub ai_endpoint: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_timeout: Duration,

    // Quota / budgets
    pub max_questions: u32,
    pub user_token_budget: u32,
    pub admin_token_budget: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("API_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "API_TOKEN environment variable is required".to_string(),
            ));
        }

        let channel = env_str("CHANNEL_ID").unwrap_or("@sozvezdie_skidok".to_string());
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        let db_path = env_path("DATABASE_PATH").unwrap_or_else(|| PathBuf::from("users.db"));
        let menus_path = env_path("MENUS_PATH").unwrap_or_else(|| PathBuf::from("menus.json"));

        let health_port = env_u16("PORT").unwrap_or(5000);

        let ai_endpoint = env_str("AI_ENDPOINT")
            .and_then(non_empty)
            .unwrap_or("https://api.openai.com/v1/chat/completions".to_string());
        let ai_api_key = env_str("AI_API_KEY").and_then(non_empty);
        let ai_model = env_str("AI_MODEL")
            .and_then(non_empty)
            .unwrap_or("gpt-4o-mini".to_string());
        let ai_timeout = Duration::from_secs(env_u64("AI_TIMEOUT_SECS").unwrap_or(30));

        let max_questions = env_u32("MAX_QUESTIONS").unwrap_or(5);
        let user_token_budget = env_u32("USER_TOKEN_BUDGET").unwrap_or(512);
        let admin_token_budget = env_u32("ADMIN_TOKEN_BUDGET").unwrap_or(2048);

        Ok(Self {
            bot_token,
            channel,
            admin_ids,
            db_path,
            menus_path,
            health_port,
            ai_endpoint,
            ai_api_key,
            ai_model,
            ai_timeout,
            max_questions,
            user_token_budget,
            admin_token_budget,
        })
    }

    pub fn role_for(&self, user_id: UserId) -> Role {
        if self.admin_ids.contains(&user_id.0) {
            Role::Admin
        } else {
            Role::Regular
        }
    }

    pub fn token_budget(&self, role: Role) -> u32 {
        match role {
            Role::Admin => self.admin_token_budget,
            Role::Regular => self.user_token_budget,
        }
    }

    /// Channel handle without the leading `@` (for t.me links and menu vars).
    pub fn channel_handle(&self) -> &str {
        self.channel.trim_start_matches('@')
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
