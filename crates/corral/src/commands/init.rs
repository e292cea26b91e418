use crate::utils;
use colored::Colorize;

/// A sample environments.yaml with one stanza per provider. Every
/// `{{rand}}` gets a fresh random value.
pub fn boilerplate() -> String {
    let providers = utils::providers();
    let mut out = String::new();
    if let Some(first) = providers.first() {
        out.push_str(&format!("default: {}\n", first.provider_type()));
    }
    out.push_str("environments:\n");
    for provider in &providers {
        for line in provider.boilerplate_config().lines() {
            let line = line.replace("{{rand}}", &uuid::Uuid::new_v4().simple().to_string());
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&format!("  {}\n", line));
            }
        }
        out.push('\n');
    }
    out
}

pub fn handle(show: bool, force: bool) -> anyhow::Result<()> {
    let content = boilerplate();
    if show {
        print!("{}", content);
        return Ok(());
    }

    let path = corral_config::get_config_dir()?.join("environments.yaml");
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; use --force to overwrite it",
            path.display()
        );
    }
    std::fs::write(&path, content)?;

    println!("{}", "✓ Wrote sample environments file".green());
    println!("  {}", path.display().to_string().cyan());
    println!();
    println!("{}", "Edit it, then bootstrap with:".bold());
    println!("  {} bootstrap", "corral".cyan());
    Ok(())
}
