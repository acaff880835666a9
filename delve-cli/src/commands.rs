//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_file).await,
    }
}

async fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".delve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = delve_core::DelveConfig::default()
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = delve_core::config::load_config(Some(workspace), config_file, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = config
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            println!("{}", toml_str);
            Ok(())
        }
        ConfigAction::Validate => {
            let config = delve_core::config::load_config(Some(workspace), config_file, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration OK.");
                return Ok(());
            }
            for warning in &warnings {
                println!("warning: {}", warning);
            }
            anyhow::bail!("{} configuration warning(s)", warnings.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let config_path = workspace.join(".delve").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: delve_core::DelveConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.research.max_rounds, 3);
    }

    #[tokio::test]
    async fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("delve.toml");
        std::fs::write(
            &config_path,
            "[email]\nenabled = true\nfrom_address = \"not-an-address\"\n",
        )
        .unwrap();

        let command = Commands::Config {
            action: ConfigAction::Validate,
        };
        let result = handle_command(command, dir.path(), Some(&config_path)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_config_show_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        let err = handle_command(command, dir.path(), Some(&missing))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }
}
