mod check;
mod git;

use anyhow::{bail, Result};
use check::check_tree_entries;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env};
use git::{EntryKind, TreeEntry};
use log::info;
use owo_colors::OwoColorize;
use std::io::IsTerminal;

#[derive(Parser)]
#[command(
    name = "twig",
    version,
    about = "Checks Git tree entries for names that are unsafe on case-insensitive or normalising filesystems"
)]
struct Cli {
    #[arg(long, default_value_t = ColorOutput::Auto)]
    color: ColorOutput,

    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Check the entries of a tree (a commit, branch, tag or tree hash).
    Tree(TreeArgs),
    /// Check the entries staged in the index.
    Staged,
}

#[derive(Parser)]
struct TreeArgs {
    /// Tree-ish to check.
    #[arg(default_value = "HEAD")]
    treeish: String,
}

#[derive(ValueEnum, Clone)]
enum ColorOutput {
    Auto,
    Always,
    Never,
}

impl std::fmt::Display for ColorOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorOutput::Auto => write!(f, "auto"),
            ColorOutput::Always => write!(f, "always"),
            ColorOutput::Never => write!(f, "never"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let env = Env::new()
        .filter_or("TWIG_LOG", default_level)
        .write_style("TWIG_LOG_STYLE");
    Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match &cli.command {
        SubCommand::Tree(args) => subcommand_tree(&cli, args),
        SubCommand::Staged => subcommand_staged(&cli),
    }
}

fn subcommand_tree(cli: &Cli, args: &TreeArgs) -> Result<()> {
    let top_level = git::git_top_level()?;
    let entries = git::git_tree_entries(&top_level, &args.treeish)?;
    report(cli, &entries)
}

fn subcommand_staged(cli: &Cli) -> Result<()> {
    let top_level = git::git_top_level()?;
    let entries = git::git_staged_entries(&top_level)?;
    report(cli, &entries)
}

fn report(cli: &Cli, entries: &[TreeEntry]) -> Result<()> {
    let directories = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Tree)
        .count();
    info!("Checking {} entries ({directories} directories)", entries.len());

    let result = check_tree_entries(entries);

    // Diagnostics go to stdout unmodified; the format is a contract with
    // downstream consumers.
    for error in &result.errors {
        println!("{error}");
    }

    let color = match cli.color {
        ColorOutput::Always => true,
        ColorOutput::Never => false,
        ColorOutput::Auto => std::io::stderr().is_terminal(),
    };

    if result.errors.is_empty() {
        if color {
            eprintln!("Tree check {}", "passed".green());
        } else {
            eprintln!("Tree check passed");
        }
        Ok(())
    } else {
        if color {
            eprintln!("Tree check {}", "failed".red());
        } else {
            eprintln!("Tree check failed");
        }
        bail!("{} problems found", result.errors.len());
    }
}
