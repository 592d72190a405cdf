use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add one or more sites to the directory.
    Add(AddArgs),
    /// List active sites.
    List(ListArgs),
    /// Delete one site and its screenshot asset.
    Delete(DeleteArgs),
    /// Delete every site and screenshot asset.
    DeleteAll,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// URLs to catalog (scheme optional; https is assumed).
    #[arg(required = true)]
    pub urls: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print raw JSON documents instead of one line per site.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Document id of the site to delete.
    pub id: String,
}
