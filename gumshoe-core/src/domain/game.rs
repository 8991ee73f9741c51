//! Game variants and their configuration document

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::result::Error;

/// Default configuration document written for seeded and backfilled rows.
///
/// Stored verbatim so the database text is byte-identical across runs.
pub const DEFAULT_GAME_CONFIG: &str = r#"{"worldMap": {}, "items": {}, "npcs": {}, "features": {}}"#;

/// Top-level keys every configuration document carries
pub const GAME_CONFIG_KEYS: [&str; 4] = ["worldMap", "items", "npcs", "features"];

/// A game variant sharing the backend schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Noir,
    Fantasy,
    Cyberpunk,
}

impl GameType {
    /// All known game types, in seeding order
    pub const ALL: [GameType; 3] = [GameType::Noir, GameType::Fantasy, GameType::Cyberpunk];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Noir => "noir",
            GameType::Fantasy => "fantasy",
            GameType::Cyberpunk => "cyberpunk",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "noir" => Ok(GameType::Noir),
            "fantasy" => Ok(GameType::Fantasy),
            "cyberpunk" => Ok(GameType::Cyberpunk),
            other => Err(Error::validation(format!("Unknown game type: {}", other))),
        }
    }
}

/// Parsed `game_config` document
///
/// Missing sections default to empty maps; unknown top-level keys are kept
/// in `extra` so a parse/serialize cycle never drops data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    #[serde(default)]
    pub world_map: Map<String, Value>,
    #[serde(default)]
    pub items: Map<String, Value>,
    #[serde(default)]
    pub npcs: Map<String, Value>,
    #[serde(default)]
    pub features: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GameConfig {
    /// Parse a stored configuration document
    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Top-level keys of the document that are absent or not JSON objects.
    ///
    /// Returns an error if `raw` is not a JSON object at all.
    pub fn missing_keys(raw: &str) -> Result<Vec<&'static str>, Error> {
        let value: Value = serde_json::from_str(raw)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("game_config is not a JSON object"))?;

        Ok(GAME_CONFIG_KEYS
            .iter()
            .copied()
            .filter(|key| !obj.get(*key).map(Value::is_object).unwrap_or(false))
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.world_map.is_empty()
            && self.items.is_empty()
            && self.npcs.is_empty()
            && self.features.is_empty()
            && self.extra.is_empty()
    }
}
