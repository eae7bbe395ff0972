//! `kenning config`: configuration management commands.

use kenning_config::AppConfig;
use std::path::{Path, PathBuf};

use crate::runtime::{CliResult, load_config};

fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub async fn validate(path: Option<&Path>) -> CliResult {
    println!("🔍 Validating configuration...");

    match load_config(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if config.llm.api_key.is_none() {
                warnings.push("No API key set (set KENNING_API_KEY); extraction will fail");
            }

            if config.store.backend == "memory" {
                warnings.push("In-memory store: nothing survives the process");
            }

            if config.observers.disabled.len() >= 7 {
                warnings.push("Every observer is disabled");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   LLM:        {}", config.llm.api_url);
            println!("   Extraction: {} tier", config.pipeline.extraction_tier);
            println!("   Store:      {}", config.store.backend);
            println!("   Promote at: {}", config.memory.promotion_threshold);
        }
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    }

    Ok(())
}

pub async fn show(path: Option<&Path>) -> CliResult {
    let mut config = load_config(path)?;
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("********".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(path: Option<&Path>) -> CliResult {
    println!("{}", config_path(path).display());
    Ok(())
}

pub async fn init(path: Option<&Path>) -> CliResult {
    let target = config_path(path);
    if target.exists() {
        println!("Config already exists at {}", target.display());
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, AppConfig::default_toml())?;
    println!("✅ Wrote default config to {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_under_config_dir() {
        let path = config_path(None);
        assert!(path.ends_with("config.toml"));
        assert!(path.starts_with(AppConfig::config_dir()));
    }

    #[test]
    fn explicit_path_wins() {
        let path = config_path(Some(Path::new("/etc/kenning.toml")));
        assert_eq!(path, PathBuf::from("/etc/kenning.toml"));
    }

    #[test]
    fn default_toml_round_trips_through_the_loader() {
        let dir = std::env::temp_dir().join(format!("kenning-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("config.toml");
        std::fs::write(&file, AppConfig::default_toml()).unwrap();

        let loaded = AppConfig::load_from(&file).unwrap();
        assert_eq!(loaded.store.backend, "sqlite");
        assert_eq!(loaded.observers.max_concurrent_llm, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
