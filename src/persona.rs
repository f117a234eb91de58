use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Mapped voice ids starting with this prefix are unfilled template values.
pub const PLACEHOLDER_PREFIX: &str = "YOUR_";

/// A caricatured speaker the dialogue is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    JoeRogan,
    BenShapiro,
    DonaldTrump,
    JoeBiden,
    ElonMusk,
    BarackObama,
}

impl Persona {
    pub const ALL: [Persona; 6] = [
        Persona::JoeRogan,
        Persona::BenShapiro,
        Persona::DonaldTrump,
        Persona::JoeBiden,
        Persona::ElonMusk,
        Persona::BarackObama,
    ];

    /// Identifier used in prompts, transcripts and artifact filenames.
    pub fn id(self) -> &'static str {
        match self {
            Persona::JoeRogan => "JOE_ROGAN",
            Persona::BenShapiro => "BEN_SHAPIRO",
            Persona::DonaldTrump => "DONALD_TRUMP",
            Persona::JoeBiden => "JOE_BIDEN",
            Persona::ElonMusk => "ELON_MUSK",
            Persona::BarackObama => "BARACK_OBAMA",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Persona::JoeRogan => "Joe Rogan",
            Persona::BenShapiro => "Ben Shapiro",
            Persona::DonaldTrump => "Donald Trump",
            Persona::JoeBiden => "Joe Biden",
            Persona::ElonMusk => "Elon Musk",
            Persona::BarackObama => "Barack Obama",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Persona {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Persona::ALL
            .into_iter()
            .find(|p| p.id() == s)
            .ok_or_else(|| PipelineError::InvalidRequest(format!("unknown persona '{s}'")))
    }
}

/// Immutable persona -> TTS voice id table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTable {
    entries: HashMap<Persona, String>,
}

impl Default for VoiceTable {
    fn default() -> Self {
        let entries = Persona::ALL
            .into_iter()
            .map(|p| (p, format!("{PLACEHOLDER_PREFIX}{}_VOICE_ID", p.id())))
            .collect();
        Self { entries }
    }
}

impl VoiceTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, persona: Persona, voice_id: impl Into<String>) -> Self {
        self.entries.insert(persona, voice_id.into());
        self
    }

    pub fn get(&self, persona: Persona) -> Option<&str> {
        self.entries.get(&persona).map(String::as_str)
    }

    /// Layers a JSON object of `{"PERSONA_ID": "voice-id"}` over the defaults.
    pub fn from_json_overrides(json: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("voice table is not a JSON object of strings: {e}")))?;

        let mut table = VoiceTable::default();
        for (key, voice_id) in raw {
            let persona = key
                .parse::<Persona>()
                .map_err(|_| PipelineError::Config(format!("voice table names unknown persona '{key}'")))?;
            table.entries.insert(persona, voice_id);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read voice table {}: {e}", path.display()))
        })?;
        Self::from_json_overrides(&data)
    }
}
