//! Command-line arguments.

use anyhow::{anyhow, bail, Context};
use chronicle_core::{ActivityType, CharacterId, CharacterRecord, Orchestrator, RiskTier, SessionConfig, TimeRatio};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Options {
    pub saves: PathBuf,
    pub character: Option<CharacterId>,
    pub name: String,
    pub class: String,
    pub level: u8,
    pub hit_points: i32,
    pub activity: ActivityType,
    pub risk: RiskTier,
    pub location: Option<String>,
    pub quest: bool,
    pub ratio: Option<TimeRatio>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            saves: PathBuf::from("saves"),
            character: None,
            name: "Adventurer".to_string(),
            class: "fighter".to_string(),
            level: 1,
            hit_points: 12,
            activity: ActivityType::default(),
            risk: RiskTier::default(),
            location: None,
            quest: false,
            ratio: None,
        }
    }
}

impl Options {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new()
            .with_activity(self.activity)
            .with_risk(self.risk)
            .quest_advancing(self.quest);
        if let Some(location) = &self.location {
            config = config.with_location(location);
        }
        if let Some(ratio) = self.ratio {
            config = config.with_time_ratio(ratio);
        }
        config
    }
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter().skip(1);

    while let Some(flag) = iter.next() {
        if flag == "--quest" {
            options.quest = true;
            continue;
        }
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("{flag} expects a value"))?;
        match flag.as_str() {
            "--saves" => options.saves = PathBuf::from(value),
            "--character" => {
                options.character = Some(value.parse().with_context(|| format!("invalid character id '{value}'"))?)
            }
            "--name" => options.name = value.clone(),
            "--class" => options.class = value.clone(),
            "--level" => options.level = value.parse().context("--level expects 1-20")?,
            "--hp" => options.hit_points = value.parse().context("--hp expects a number")?,
            "--activity" => options.activity = value.parse().map_err(|e: String| anyhow!(e))?,
            "--risk" => options.risk = value.parse().map_err(|e: String| anyhow!(e))?,
            "--location" => options.location = Some(value.clone()),
            "--ratio" => options.ratio = Some(value.parse().map_err(|e: String| anyhow!(e))?),
            other => bail!("unknown argument '{other}' (try --help)"),
        }
    }

    Ok(options)
}

/// Load `--character` from the store, or create a fresh character.
pub async fn load_or_create_character(orchestrator: &Orchestrator, options: &Options) -> anyhow::Result<CharacterRecord> {
    if let Some(id) = options.character {
        return orchestrator
            .records()
            .character(id)
            .await?
            .ok_or_else(|| anyhow!("no character {id} under {}", options.saves.display()));
    }

    let character = CharacterRecord::new(&options.name, &options.class, options.level, options.hit_points);
    orchestrator.records().save(&character).await?;
    info!(character_id = %character.id, name = %character.name, "character created");
    Ok(character)
}

pub fn print_help() {
    println!("chronicle - play narrated sessions in the terminal");
    println!();
    println!("Options:");
    println!("  --saves <dir>        Where records are stored (default: saves)");
    println!("  --character <id>     Continue with an existing character");
    println!("  --name <name>        New character name (default: Adventurer)");
    println!("  --class <class>      New character class or occupation (default: fighter)");
    println!("  --level <n>          New character level (default: 1)");
    println!("  --hp <n>             New character maximum HP (default: 12)");
    println!("  --activity <kind>    combat, exploration, infiltration, diplomacy, investigation, gathering");
    println!("  --risk <tier>        low, medium, high");
    println!("  --location <place>   Where the session opens");
    println!("  --quest              The session advances the main quest");
    println!("  --ratio <1:N>        Game hours per real hour: 1:1, 1:2, 1:4, 1:6, 1:12, 1:24");
    println!();
    println!("Environment:");
    println!("  ANTHROPIC_API_KEY, CHRONICLE_MODEL, CHRONICLE_MAX_TOKENS, OLLAMA_BASE_URL, OLLAMA_MODEL");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("chronicle")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_session_options() {
        let options = parse_args(&args(&[
            "--name",
            "Aria",
            "--activity",
            "infiltration",
            "--risk",
            "high",
            "--quest",
            "--ratio",
            "1:4",
        ]))
        .unwrap();

        assert_eq!(options.name, "Aria");
        let config = options.session_config();
        assert_eq!(config.activity, ActivityType::Infiltration);
        assert_eq!(config.risk, RiskTier::High);
        assert!(config.quest_advancing);
        assert_eq!(config.time_ratio, Some(TimeRatio::OneToFour));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_args(&args(&["--risk", "extreme"])).is_err());
        assert!(parse_args(&args(&["--level"])).is_err());
        assert!(parse_args(&args(&["--bogus", "1"])).is_err());
    }
}
