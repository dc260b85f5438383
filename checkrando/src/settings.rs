use anyhow::{Context, Result, bail};
use checkrando_game::CheckType;
use checkrando_logic::MacroTable;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

pub const VERSION: usize = include!("../../VERSION");

// Bits 0-5 are the pool flags, then transitions and respect_obtained; skips fill the rest.
const POOL_FLAG_BITS: usize = 6;
const TRANSITIONS_BIT: usize = 6;
const RESPECT_OBTAINED_BIT: usize = 7;
const SKIP_FLAG_OFFSET: usize = 8;
pub const MAX_SKIP_FLAGS: usize = 64 - SKIP_FLAG_OFFSET;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RandomizerSettings {
    pub version: usize,
    pub name: Option<String>,
    pub pool_settings: PoolSettings,
    #[serde(default)]
    pub starting_items: Vec<StartingItem>,
    #[serde(default)]
    pub skip_settings: Vec<SkipSetting>,
    pub transition_settings: TransitionSettings,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub respect_obtained: bool,
}

fn default_max_attempts() -> usize {
    20
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PoolSettings {
    pub items: bool,
    pub abilities: bool,
    pub toggles: bool,
    pub shops: bool,
    pub keys: bool,
    pub currency: bool,
}

impl PoolSettings {
    pub fn includes(&self, check_type: CheckType) -> bool {
        match check_type {
            CheckType::Item => self.items,
            CheckType::Ability => self.abilities,
            CheckType::Toggle => self.toggles,
            CheckType::Shop => self.shops,
            CheckType::Key => self.keys,
            CheckType::Currency => self.currency,
        }
    }

    fn flags(&self) -> [bool; POOL_FLAG_BITS] {
        [
            self.items,
            self.abilities,
            self.toggles,
            self.shops,
            self.keys,
            self.currency,
        ]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StartingItem {
    pub state: String,
    pub count: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SkipSetting {
    pub name: String,
    pub enabled: bool,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub enum TransitionMode {
    Vanilla,
    Randomized,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransitionSettings {
    pub mode: TransitionMode,
    pub swap_attempts: usize,
}

impl Default for RandomizerSettings {
    fn default() -> Self {
        RandomizerSettings {
            version: VERSION,
            name: None,
            pool_settings: PoolSettings {
                items: true,
                abilities: true,
                toggles: false,
                shops: true,
                keys: true,
                currency: false,
            },
            starting_items: vec![],
            skip_settings: vec![],
            transition_settings: TransitionSettings {
                mode: TransitionMode::Vanilla,
                swap_attempts: 200,
            },
            max_attempts: default_max_attempts(),
            respect_obtained: false,
        }
    }
}

impl RandomizerSettings {
    pub fn skip_enabled(&self, name: &str) -> bool {
        self.skip_settings
            .iter()
            .any(|s| s.name == name && s.enabled)
    }

    /// Skip identifiers in logic text compile to `true` when enabled and `false` otherwise.
    pub fn skip_predicate(&self) -> HashMap<String, bool> {
        self.skip_settings
            .iter()
            .map(|s| (s.name.clone(), s.enabled))
            .collect()
    }

    // Rebinds macros that share a name with a skip setting.
    pub fn bind_macros(&self, macros: &mut MacroTable) {
        for skip in &self.skip_settings {
            if macros.get(&skip.name).is_some() {
                macros.bind(&skip.name, skip.enabled);
            }
        }
    }

    /// Packs the boolean settings into the fixed-width field stored alongside the seed.
    pub fn to_flags(&self) -> Result<u64> {
        if self.skip_settings.len() > MAX_SKIP_FLAGS {
            bail!(
                "{} skip settings do not fit in the flag field (max {MAX_SKIP_FLAGS})",
                self.skip_settings.len()
            );
        }
        let mut flags = 0u64;
        for (i, on) in self.pool_settings.flags().into_iter().enumerate() {
            if on {
                flags |= 1 << i;
            }
        }
        if self.transition_settings.mode == TransitionMode::Randomized {
            flags |= 1 << TRANSITIONS_BIT;
        }
        if self.respect_obtained {
            flags |= 1 << RESPECT_OBTAINED_BIT;
        }
        for (i, skip) in self.skip_settings.iter().enumerate() {
            if skip.enabled {
                flags |= 1 << (SKIP_FLAG_OFFSET + i);
            }
        }
        Ok(flags)
    }

    /// Applies a packed flag field onto `template`, which supplies skip names and
    /// the non-boolean settings.
    pub fn from_flags(flags: u64, template: &RandomizerSettings) -> RandomizerSettings {
        let bit = |i: usize| flags & (1 << i) != 0;
        let mut settings = template.clone();
        settings.pool_settings = PoolSettings {
            items: bit(0),
            abilities: bit(1),
            toggles: bit(2),
            shops: bit(3),
            keys: bit(4),
            currency: bit(5),
        };
        settings.transition_settings.mode = if bit(TRANSITIONS_BIT) {
            TransitionMode::Randomized
        } else {
            TransitionMode::Vanilla
        };
        settings.respect_obtained = bit(RESPECT_OBTAINED_BIT);
        for (i, skip) in settings.skip_settings.iter_mut().enumerate() {
            if i < MAX_SKIP_FLAGS {
                skip.enabled = bit(SKIP_FLAG_OFFSET + i);
            }
        }
        settings
    }
}

pub fn parse_randomizer_settings(settings_json: &str) -> Result<RandomizerSettings> {
    let mut des = serde_json::Deserializer::from_str(settings_json);
    let settings = serde_path_to_error::deserialize(&mut des)?;
    Ok(settings)
}

fn upgrade_transition_settings(settings: &mut serde_json::Value) -> Result<()> {
    let settings_obj = settings
        .as_object_mut()
        .context("expected settings to be an object")?;
    if !settings_obj.contains_key("transition_settings") {
        // Older settings only had a boolean toggle:
        let randomized = settings_obj
            .remove("randomize_transitions")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mode = if randomized { "Randomized" } else { "Vanilla" };
        settings_obj.insert(
            "transition_settings".to_string(),
            serde_json::json!({"mode": mode, "swap_attempts": 200}),
        );
    }
    Ok(())
}

pub fn try_upgrade_settings(settings_str: &str) -> Result<(String, RandomizerSettings)> {
    let mut settings: serde_json::Value = serde_json::from_str(settings_str)?;

    upgrade_transition_settings(&mut settings)?;

    // Update version field to current version:
    *settings
        .get_mut("version")
        .context("missing version field")? = VERSION.into();

    // Validate that the upgraded settings will parse as a RandomizerSettings struct:
    let settings_str = settings.to_string();
    let settings_out = parse_randomizer_settings(&settings_str)?;
    let settings_out_str = serde_json::to_string(&settings_out)?;
    Ok((settings_out_str, settings_out))
}
