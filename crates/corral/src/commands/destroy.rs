use crate::utils;
use colored::Colorize;

pub async fn handle(environment: Option<&str>, yes: bool) -> anyhow::Result<()> {
    let environ = utils::open_environ(environment)?;

    if !yes {
        println!();
        println!(
            "{}",
            format!(
                "Warning: every machine in {:?} will be terminated and its storage removed.",
                environ.name()
            )
            .yellow()
        );
        println!("Pass --yes to go ahead");
        return Ok(());
    }

    println!("{}", "Destroying environment...".blue().bold());
    environ.destroy(&[]).await?;

    let statuses = utils::status_collection(&environ.config())?;
    for key in statuses.keys().await? {
        statuses.remove(&key).await?;
    }

    println!("{} {}", "✓ Destroyed".green().bold(), environ.name().cyan());
    Ok(())
}
