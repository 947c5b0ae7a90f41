use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use stockroom_engine::EngineConfig;
use stockroom_types::models::RoomKind;

/// A room created at startup, from `name:kind[:SYMBOL]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRoom {
    pub name: String,
    pub kind: RoomKind,
    pub symbol: Option<String>,
}

impl FromStr for SeedRoom {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.trim().split(':');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            bail!("seed room '{}' has no name", s);
        }
        let kind = match parts.next() {
            Some(kind) => kind
                .trim()
                .parse::<RoomKind>()
                .map_err(|e| anyhow::anyhow!("seed room '{}': {}", s, e))?,
            None => RoomKind::General,
        };
        let symbol = parts.next().map(|s| s.trim().to_string());
        if parts.next().is_some() {
            bail!("seed room '{}' has too many fields", s);
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            symbol,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Frames buffered per session before the hub drops it
    pub session_queue: usize,
    pub request_timeout: Duration,
    pub seed_rooms: Vec<SeedRoom>,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Read `STOCKROOM_*` variables, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut engine = EngineConfig::default();
        engine.flag_threshold = parse_var("STOCKROOM_FLAG_THRESHOLD", engine.flag_threshold)?;

        let seed_rooms = var_or("STOCKROOM_SEED_ROOMS", "general:general,stocks:general")
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(SeedRoom::from_str)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            host: var_or("STOCKROOM_HOST", "0.0.0.0"),
            port: parse_var("STOCKROOM_PORT", 3000)?,
            jwt_secret: var_or("STOCKROOM_JWT_SECRET", "dev-secret-change-me"),
            session_queue: parse_var("STOCKROOM_SESSION_QUEUE", 256)?,
            request_timeout: Duration::from_millis(parse_var(
                "STOCKROOM_REQUEST_TIMEOUT_MS",
                5000,
            )?),
            seed_rooms,
            engine,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seed_rooms() {
        let room: SeedRoom = "tesla:ticker:TSLA".parse().unwrap();
        assert_eq!(room.kind, RoomKind::Ticker);
        assert_eq!(room.symbol.as_deref(), Some("TSLA"));

        let plain: SeedRoom = "lounge".parse().unwrap();
        assert_eq!(plain.kind, RoomKind::General);
        assert!(plain.symbol.is_none());

        assert!(":general".parse::<SeedRoom>().is_err());
        assert!("x:nonsense".parse::<SeedRoom>().is_err());
        assert!("a:ticker:B:C".parse::<SeedRoom>().is_err());
    }
}
