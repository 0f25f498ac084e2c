use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use wan2gp_patcher::backup::{self, BackupOutcome, BackupState, RestoreOutcome};
use wan2gp_patcher::config::{
    apply_patches, check_patches, load_builtin, load_from_path, ApplicationError, FileOutcome,
    FilePlan, PatchConfig, RuleStatus, RunReport, BUILTIN_SOURCE,
};
use wan2gp_patcher::WorkspaceGuard;

#[derive(Parser)]
#[command(name = "wan2gp-patcher")]
#[command(about = "Idempotent RTX 5090 compatibility patcher for Wan2GP", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Defaults to `apply` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Default)]
struct TargetArgs {
    /// Path to the Wan2GP checkout (defaults to WAN2GP_WORKSPACE, then the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Patch set file or directory of *.toml sets (defaults to the built-in RTX 5090 set)
    #[arg(short, long)]
    patches: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patches to a workspace
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Check status of patches and backups without applying
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Put backed-up originals back and remove the backups
    Restore {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List available patches
    List {
        /// Patch set file or directory (defaults to the built-in set)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Apply {
        target: TargetArgs::default(),
        dry_run: false,
        diff: false,
    }) {
        Commands::Apply {
            target,
            dry_run,
            diff,
        } => cmd_apply(target, dry_run, diff),

        Commands::Status { target } => cmd_status(target),

        Commands::Restore { target } => cmd_restore(target),

        Commands::List { patches } => cmd_list(patches),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve workspace path
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. WAN2GP_WORKSPACE environment variable
/// 3. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return Ok(path.canonicalize()?);
    }

    if let Ok(env_path) = env::var("WAN2GP_WORKSPACE") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: WAN2GP_WORKSPACE is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?)
}

/// Load the patch sets to run, paired with a display name for each.
///
/// A directory is scanned (non-recursively) for `*.toml` files in name order.
fn load_patch_sets(patches: Option<PathBuf>) -> Result<Vec<(String, PatchConfig)>> {
    let Some(path) = patches else {
        return Ok(vec![(BUILTIN_SOURCE.to_string(), load_builtin()?)]);
    };

    if !path.is_dir() {
        let config = load_from_path(&path)?;
        return Ok(vec![(path.display().to_string(), config)]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&path).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .toml patch files found in {}", path.display());
    }

    files
        .into_iter()
        .map(|file| -> Result<(String, PatchConfig)> {
            let config = load_from_path(&file)?;
            Ok((file.display().to_string(), config))
        })
        .collect()
}

/// Check that every patch set's entry file is present in the workspace.
fn entry_files_present(workspace: &Path, sets: &[(String, PatchConfig)]) -> bool {
    let mut ok = true;
    for (_, config) in sets {
        let entry = workspace.join(&config.meta.entry_file);
        if !entry.is_file() {
            eprintln!(
                "{} Not in a Wan2GP directory: {} not found in {}",
                "✗".red(),
                config.meta.entry_file,
                workspace.display()
            );
            eprintln!("  Run from the folder containing it, or pass --workspace");
            ok = false;
        }
    }
    ok
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", file).dimmed());
    println!("{}", format!("+++ {} (patched)", file).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        println!("{}", format!("{}", hunk.header()).cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{}", change).red(),
                ChangeTag::Insert => format!("+{}", change).green(),
                ChangeTag::Equal => format!(" {}", change).normal(),
            };
            print!("{}", line);
            if change.missing_newline() {
                println!();
            }
        }
    }
    println!();
}

fn print_rules(plan: &FilePlan) {
    for rule in &plan.rules {
        match &rule.status {
            RuleStatus::Applied => println!("      {} {}", "✓".green(), rule.id),
            RuleStatus::AlreadyApplied => {
                println!("      {} {}: already applied", "⊙".yellow(), rule.id)
            }
            RuleStatus::TargetMissing { hint } => {
                println!(
                    "      {} {}: target not found, pattern may be stale",
                    "⊘".cyan(),
                    rule.id
                );
                if let Some(hint) = hint {
                    println!(
                        "        {}",
                        format!("closest line {}: {}", hint.line, hint.text).dimmed()
                    );
                }
            }
        }
    }
}

fn print_error(file: &str, e: &ApplicationError) {
    eprintln!("  {} {}: {}", "✗".red(), file, e);
    if e.is_fatal() {
        eprintln!(
            "  {}",
            "The patch set itself is broken; no further files were processed.".red()
        );
    }
}

#[derive(Default)]
struct Totals {
    modified: usize,
    unchanged: usize,
    not_found: usize,
    failed: usize,
}

impl Totals {
    fn record(&mut self, report: &RunReport) {
        for file in &report.files {
            match &file.result {
                Ok(FileOutcome::Modified { .. }) => self.modified += 1,
                Ok(FileOutcome::Unchanged { .. }) => self.unchanged += 1,
                Ok(FileOutcome::NotFound) => self.not_found += 1,
                Err(_) => self.failed += 1,
            }
        }
    }
}

fn cmd_apply(target: TargetArgs, dry_run: bool, show_diff: bool) -> Result<()> {
    let workspace = resolve_workspace(target.workspace)?;
    let sets = load_patch_sets(target.patches)?;

    println!("Workspace: {}", workspace.display());
    println!();

    if !entry_files_present(&workspace, &sets) {
        return Ok(());
    }

    let mut totals = Totals::default();

    for (source, config) in &sets {
        println!("Loading patches from {}...", source);
        if dry_run {
            println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
        }

        let report = if dry_run {
            check_patches(config, &workspace)?
        } else {
            apply_patches(config, &workspace)?
        };
        totals.record(&report);

        for file in &report.files {
            match &file.result {
                Ok(outcome @ FileOutcome::Modified { plan, backup }) => {
                    println!("  {} {}: {}", "✓".green(), file.file, outcome);
                    if let Some(BackupOutcome::Created { backup }) = backup {
                        println!(
                            "    {}",
                            format!("backup created: {}", backup.display()).dimmed()
                        );
                    }
                    print_rules(plan);
                    if show_diff {
                        display_diff(&file.file, &plan.original, &plan.patched);
                    }
                }
                Ok(outcome @ FileOutcome::Unchanged { plan }) => {
                    println!("  {} {}: {}", "⊙".yellow(), file.file, outcome);
                    print_rules(plan);
                }
                Ok(FileOutcome::NotFound) => {
                    println!("  {} {}: not found, skipping", "✗".red(), file.file);
                }
                Err(e) => print_error(&file.file, e),
            }
        }
        println!();

        if report.aborted {
            anyhow::bail!("patch run aborted by a broken rule in {}", source);
        }
    }

    println!("{}", "Summary:".bold());
    let verb = if dry_run { "would modify" } else { "modified" };
    println!("  {} {}", format!("{}", totals.modified).green(), verb);
    println!("  {} unchanged", format!("{}", totals.unchanged).yellow());
    println!("  {} not found", format!("{}", totals.not_found).cyan());
    println!("  {} failed", format!("{}", totals.failed).red());

    if totals.modified > 0 && !dry_run {
        println!();
        println!(
            "{}",
            "To undo, run `wan2gp-patcher restore` from the same directory.".dimmed()
        );
    }

    Ok(())
}

fn cmd_status(target: TargetArgs) -> Result<()> {
    let workspace = resolve_workspace(target.workspace)?;
    let sets = load_patch_sets(target.patches)?;

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    if !entry_files_present(&workspace, &sets) {
        return Ok(());
    }

    let mut pending = 0;
    let mut applied = 0;
    let mut missing = 0;

    for (source, config) in &sets {
        println!("{}", source.bold());
        let report = check_patches(config, &workspace)?;

        for file in &report.files {
            let plan = match &file.result {
                Ok(FileOutcome::NotFound) => {
                    println!("  {} {}: not found", "✗".red(), file.file);
                    continue;
                }
                Ok(outcome) => {
                    let glyph = match outcome {
                        FileOutcome::Modified { .. } => "⊙".yellow(),
                        _ => "✓".green(),
                    };
                    let resolved = file.path.canonicalize().unwrap_or_else(|_| file.path.clone());
                    let state = match backup::inspect(&resolved, &config.meta.backup_suffix) {
                        Ok(BackupState::Missing) => "no backup".to_string(),
                        Ok(BackupState::Identical) => "backup identical to file".to_string(),
                        Ok(BackupState::Differs) => "backup holds original".to_string(),
                        Err(e) => format!("backup unreadable: {e}"),
                    };
                    let label = match outcome {
                        FileOutcome::Modified { .. } => "patches pending",
                        _ => "fully patched or nothing to do",
                    };
                    println!(
                        "  {} {}: {} ({})",
                        glyph,
                        file.file,
                        label,
                        state.dimmed()
                    );
                    outcome.plan()
                }
                Err(e) => {
                    print_error(&file.file, e);
                    continue;
                }
            };

            let Some(plan) = plan else { continue };
            for rule in &plan.rules {
                match &rule.status {
                    RuleStatus::Applied => {
                        pending += 1;
                        println!("      {} {}: not applied", "⊙".yellow(), rule.id);
                    }
                    RuleStatus::AlreadyApplied => {
                        applied += 1;
                        println!("      {} {}: applied", "✓".green(), rule.id);
                    }
                    RuleStatus::TargetMissing { hint } => {
                        missing += 1;
                        println!(
                            "      {} {}: target not found, pattern may be stale",
                            "⊘".cyan(),
                            rule.id
                        );
                        if let Some(hint) = hint {
                            println!(
                                "        {}",
                                format!("closest line {}: {}", hint.line, hint.text).dimmed()
                            );
                        }
                    }
                }
            }
        }
        println!();

        if report.aborted {
            anyhow::bail!("status check aborted by a broken rule in {}", source);
        }
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", applied).green());
    println!("  {} not applied", format!("{}", pending).yellow());
    println!("  {} target not found", format!("{}", missing).cyan());

    Ok(())
}

fn cmd_restore(target: TargetArgs) -> Result<()> {
    let workspace = resolve_workspace(target.workspace)?;
    let sets = load_patch_sets(target.patches)?;
    let guard = WorkspaceGuard::new(&workspace)?;

    println!("Workspace: {}", workspace.display());
    println!();

    let mut restored = 0;
    let mut failed = 0;

    for (source, config) in &sets {
        println!("Restoring files patched by {}...", source);
        for file in config.target_files() {
            let path = match guard.restore_target(file) {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("  {} {}: {}", "✗".red(), file, e);
                    failed += 1;
                    continue;
                }
            };

            match backup::restore(&path, &config.meta.backup_suffix) {
                Ok(RestoreOutcome::Restored { backup }) => {
                    println!(
                        "  {} {}: restored from {}",
                        "✓".green(),
                        file,
                        backup.display()
                    );
                    restored += 1;
                }
                Ok(RestoreOutcome::NoBackup) => {
                    println!("  {} {}: no backup, skipping", "⊙".yellow(), file);
                }
                Err(e) => {
                    eprintln!("  {} {}: {}", "✗".red(), file, e);
                    failed += 1;
                }
            }
        }
        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} restored", format!("{}", restored).green());
    println!("  {} failed", format!("{}", failed).red());

    Ok(())
}

fn cmd_list(patches: Option<PathBuf>) -> Result<()> {
    for (source, config) in load_patch_sets(patches)? {
        let name = if config.meta.name.is_empty() {
            source.clone()
        } else {
            config.meta.name.clone()
        };
        println!("{} {}", name.bold(), format!("({})", source).dimmed());
        if let Some(description) = &config.meta.description {
            println!("  {}", description);
        }
        println!(
            "  {}",
            format!(
                "entry file: {}, backup suffix: {}",
                config.meta.entry_file, config.meta.backup_suffix
            )
            .dimmed()
        );

        for patch in &config.patches {
            println!(
                "  - {} [{}] {}",
                patch.id,
                patch.operation.kind().cyan(),
                patch.file
            );
            if let Some(description) = &patch.description {
                println!("      {}", description.dimmed());
            }
        }
        println!();
    }

    Ok(())
}
