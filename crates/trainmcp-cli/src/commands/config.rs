//! Configuration management commands.

use trainmcp_core::config::IssueSeverity;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# Configuration file: {}", ctx.config_path.display());
            if !ctx.config_path.exists() {
                println!("# (not found, defaults shown)");
            }
            println!();
            print!("{}", ctx.config.to_toml_redacted()?);
        }
        ConfigAction::Validate => {
            let result = ctx.config.validate();
            if result.issues.is_empty() {
                println!("✓ Configuration is valid");
                return Ok(());
            }

            for issue in &result.issues {
                let marker = match issue.severity {
                    IssueSeverity::Error => "✗ error",
                    IssueSeverity::Warning => "! warning",
                };
                println!("{} {}: {}", marker, issue.field, issue.message);
            }

            let errors = result.errors().len();
            if errors > 0 {
                anyhow::bail!("configuration has {} error(s)", errors);
            }
        }
    }
    Ok(())
}
