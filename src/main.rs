use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use sitedeck::sites::BatchItemStatus;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    sitedeck::logging::init().context("init logging")?;

    let cli = sitedeck::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = sitedeck::config::Config::from_env().context("load config")?;
    let manager = config.build_manager().context("build site manager")?;

    match cli.command {
        sitedeck::cli::Command::Add(args) => {
            let outcome = manager.create_sites(&args.urls).await.context("add sites")?;
            for item in &outcome.results {
                match item.status {
                    BatchItemStatus::Created => {
                        println!("created {} {}", item.id.as_deref().unwrap_or("-"), item.url);
                    }
                    BatchItemStatus::Failed => {
                        println!(
                            "failed  {} ({})",
                            item.url,
                            item.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
            println!("added {} site(s), {} failed", outcome.created, outcome.failed);
            if outcome.created == 0 {
                anyhow::bail!("no site could be added");
            }
        }
        sitedeck::cli::Command::List(args) => {
            let sites = manager.list_active_sites().await.context("list sites")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&sites)?);
            } else {
                for site in &sites {
                    println!("{}  {:<9}  {}  {}", site.id, site.category.as_str(), site.url, site.title);
                }
                println!("{} site(s)", sites.len());
            }
        }
        sitedeck::cli::Command::Delete(args) => {
            let report = manager.delete_site(&args.id).await.context("delete site")?;
            match report.asset_deleted {
                None => println!("deleted {} (no screenshot asset)", report.site_id),
                Some(true) => println!("deleted {} and its screenshot asset", report.site_id),
                Some(false) => println!(
                    "deleted {} (screenshot asset left behind; references severed)",
                    report.site_id
                ),
            }
        }
        sitedeck::cli::Command::DeleteAll => {
            let deleted = manager.delete_all().await.context("delete all sites")?;
            println!("deleted {deleted} site(s)");
        }
    }

    Ok(())
}
