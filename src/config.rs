use std::{fmt::Display, str::FromStr};

use anyhow::{Context, anyhow};
use tracing::info;

pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Where signup confirmation links point.
    pub site_url: String,
    pub session_idle: time::Duration,
    pub token_ttl: time::Duration,
    pub auto_reply: bool,
    pub auto_reply_delay: std::time::Duration,
}

impl Config {
    /// Reads the environment (and `.env`, if loaded). Unset keys fall back to
    /// defaults, malformed ones are an error.
    pub fn load() -> anyhow::Result<Self> {
        let port = try_load("PORT", "8080")?;
        Ok(Self {
            database_url: try_load("DATABASE_URL", "sqlite://portal.db?mode=rwc")?,
            port,
            site_url: try_load("SITE_URL", &format!("http://localhost:{port}/"))?,
            session_idle: time::Duration::minutes(try_load("SESSION_IDLE_MINUTES", "30")?),
            token_ttl: time::Duration::minutes(try_load("TOKEN_TTL_MINUTES", "60")?),
            auto_reply: try_load("AUTO_REPLY", "true")?,
            auto_reply_delay: std::time::Duration::from_millis(try_load("AUTO_REPLY_DELAY_MS", "2000")?),
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let value = dotenv::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value
        .parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid {key} value {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::try_load;

    #[test]
    fn defaults_apply_to_unset_keys() {
        let port: u16 = try_load("CAMPUS_PORTAL_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);

        let bad = try_load::<u16>("CAMPUS_PORTAL_TEST_UNSET_PORT", "eighty");
        assert!(bad.unwrap_err().to_string().contains("CAMPUS_PORTAL_TEST_UNSET_PORT"));
    }
}
