use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Migrate(MigrateArgs),
    Transform(TransformArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Squarespace WXR export file.
    #[arg(long)]
    pub export: String,

    /// Output directory (media/, posts/ and report/ are created inside).
    #[arg(long)]
    pub out: String,

    /// Optional YAML config file.
    #[arg(long)]
    pub config: Option<String>,

    /// Fetch and transform everything, but write no media or posts.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum number of posts to migrate.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Number of posts to pass over before migrating.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Origin of the new site (overrides config and environment).
    #[arg(long)]
    pub site_origin: Option<String>,

    /// Host of the legacy site (overrides config and environment).
    #[arg(long)]
    pub legacy_domain: Option<String>,

    /// Media CDN domain whose images are imported (overrides config and environment).
    #[arg(long)]
    pub media_domain: Option<String>,

    /// Per-request timeout for media downloads.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct TransformArgs {
    /// HTML file to convert to a block document.
    #[arg(long)]
    pub input: String,

    /// Output file (default: stdout).
    #[arg(long)]
    pub out: Option<String>,
}
