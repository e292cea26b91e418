use crate::utils;
use colored::Colorize;
use corral_core::Status;

fn colored_status(status: Status) -> colored::ColoredString {
    match status {
        Status::Started | Status::Active | Status::Idle => status.to_string().green(),
        Status::Error | Status::Failed | Status::Down | Status::Lost | Status::Blocked => {
            status.to_string().red()
        }
        _ => status.to_string().yellow(),
    }
}

pub async fn handle(environment: Option<&str>) -> anyhow::Result<()> {
    let environ = utils::open_environ(environment)?;
    let statuses = utils::status_collection(&environ.config())?;

    println!();
    let keys = statuses.keys().await?;
    if keys.is_empty() {
        println!("{}", "No machines or units recorded".dimmed());
    } else {
        println!(
            "{}",
            format!("{:<30} {:<15} {:<40}", "ENTITY", "STATUS", "INFO").bold()
        );
        println!("{}", "─".repeat(85).dimmed());
        for key in keys {
            let doc = statuses.get(&key).await?;
            println!(
                "{:<30} {:<15} {:<40}",
                key.cyan(),
                colored_status(doc.status),
                doc.status_info.dimmed()
            );
        }
    }

    println!();
    let instances = environ.all_instances().await?;
    if instances.is_empty() {
        println!("{}", "No running instances".dimmed());
        return Ok(());
    }
    println!("{}", format!("{:<40} {:<40}", "INSTANCE", "ADDRESS").bold());
    println!("{}", "─".repeat(80).dimmed());
    for inst in instances {
        let address = match inst.dns_name().await {
            Ok(name) => name,
            Err(corral_cloud::CloudError::NoDnsName) => "pending".to_string(),
            Err(e) => return Err(e.into()),
        };
        println!("{:<40} {:<40}", inst.id().to_string().cyan(), address);
    }

    Ok(())
}
