use std::path::Path;

use anyhow::{Context, Result, bail};
use checkrando::settings::{RandomizerSettings, VERSION, try_upgrade_settings};

/// Test that settings from old versions can be upgraded
/// correctly, and that upgrading a second time has no effect.
#[test]
fn test_upgrade_old_presets() -> Result<()> {
    for entry in std::fs::read_dir("tests/presets")? {
        let entry = entry?;
        println!("Checking preset: {}", entry.path().display());
        let settings0_str = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Unable to load preset at {}", entry.path().display()))?;
        let (settings1_str, settings1) = try_upgrade_settings(&settings0_str).with_context(|| {
            format!("Unable to upgrade preset at {}", entry.path().display())
        })?;
        let (_, settings2) = try_upgrade_settings(&settings1_str).with_context(|| {
            format!(
                "Unable to double-upgrade preset at {}",
                entry.path().display()
            )
        })?;
        if settings1 != settings2 {
            bail!(
                "Settings upgrade not idempotent for preset at {}",
                entry.path().display()
            );
        }
        if settings1.version != VERSION {
            bail!("Preset at {} not upgraded to version {VERSION}", entry.path().display());
        }
    }
    Ok(())
}

/// Test that current settings are unchanged by upgrading.
#[test]
fn test_upgrade_current_presets() -> Result<()> {
    let demo_path = Path::new("data/demo_settings.json");
    let demo_str = std::fs::read_to_string(demo_path)
        .with_context(|| format!("Unable to load settings at {}", demo_path.display()))?;
    let demo: RandomizerSettings = serde_json::from_str(&demo_str)?;

    for preset in [RandomizerSettings::default(), demo] {
        println!("Checking preset: {:?}", preset.name);
        let settings_str = serde_json::to_string_pretty(&preset)
            .with_context(|| "Unable to serialize current preset")?;
        let (_, upgraded_settings) = try_upgrade_settings(&settings_str)
            .with_context(|| "Unable to upgrade current preset")?;
        if preset != upgraded_settings {
            bail!("Current preset changed by upgrade");
        }
    }
    Ok(())
}
