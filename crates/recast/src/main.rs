use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use recast::cli::{Cli, Commands, LogFormat, parse_cli};
use recast::report::{render_backups, render_plan, render_report, render_status};
use recast::{MessagePlanner, RewriteOrchestrator, RunContext};
use recast_config::{
    InitOverrides, RecastConfig, check_config, config_path, ensure_workspace_config,
    init_workspace_config, validate_config,
};
use recast_git::GitCli;
use recast_store::SqliteStore;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RECAST_LOG";

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format)?;
    run(cli)
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_new("info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    match format {
        LogFormat::Human => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    if let Commands::Init(args) = &cli.command {
        let config = init_workspace_config(
            &workspace,
            &InitOverrides {
                branch: args.branch.clone(),
                api_key_env: args.api_key_env.clone(),
            },
            args.force,
        )
        .context("failed to write workspace config")?;
        report_config_warnings(&config);
        println!("Wrote {}", config_path(&workspace).display());
        return Ok(());
    }

    let mut config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    match &cli.command {
        Commands::Analyze(cluster) => cluster.apply(&mut config),
        Commands::Run(args) => args.cluster.apply(&mut config),
        _ => {}
    }
    check_config(&config).context("invalid configuration")?;
    report_config_warnings(&config);

    let vcs = GitCli::open(&workspace)
        .with_context(|| format!("failed to open git repository at {}", workspace.display()))?;
    let store = SqliteStore::open(&workspace, &config.storage.database)
        .context("failed to open state store")?;
    let planner =
        MessagePlanner::from_config(&config.inference).context("failed to load message generator")?;
    let orchestrator = RewriteOrchestrator::new(&vcs, &store, &planner, &config);

    let mut stdout = io::stdout();
    let branch = orchestrator
        .target_branch()
        .unwrap_or_else(|_| "HEAD".to_owned());
    let mut ctx = RunContext::for_branch(&branch, &mut stdout);

    match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Analyze(_) => {
            let plan = orchestrator.preview(&mut ctx).context("analysis failed")?;
            render_plan(&plan, false, ctx.out)?;
            Ok(())
        }
        Commands::Run(args) => {
            if !args.applies() {
                let plan = orchestrator.preview(&mut ctx).context("dry run failed")?;
                render_plan(&plan, true, ctx.out)?;
                return Ok(());
            }
            if !args.yes && !confirm(&format!("Rewrite the history of {branch}?"))? {
                bail!("aborted by user");
            }
            let report = orchestrator.run(&mut ctx).context("rewrite failed")?;
            render_report(&report, ctx.out)?;
            Ok(())
        }
        Commands::Resume(args) => {
            if !args.yes && !confirm("Resume the interrupted rewrite?")? {
                bail!("aborted by user");
            }
            let report = orchestrator.resume(&mut ctx).context("resume failed")?;
            render_report(&report, ctx.out)?;
            Ok(())
        }
        Commands::Status => {
            let status = orchestrator.status().context("failed to read state")?;
            render_status(&status, ctx.out)?;
            Ok(())
        }
        Commands::ListBackups => {
            let backups = orchestrator
                .list_backups()
                .context("failed to list backups")?;
            render_backups(&backups, ctx.out)?;
            Ok(())
        }
        Commands::Rollback(args) => {
            if !args.yes
                && !confirm(&format!("Reset the branch to {}?", args.backup))?
            {
                bail!("aborted by user");
            }
            orchestrator
                .rollback(&mut ctx, &args.backup)
                .with_context(|| format!("rollback to {} failed", args.backup))?;
            Ok(())
        }
        Commands::Reset(args) => {
            let scope = if args.all { "all recorded state" } else { "rewrite progress" };
            if !args.yes && !confirm(&format!("Forget {scope}?"))? {
                bail!("aborted by user");
            }
            orchestrator.reset(&mut ctx, args.all).context("reset failed")?;
            Ok(())
        }
        Commands::ExportState(args) => export_state(&store, &args.path, ctx.out),
    }
}

fn export_state(store: &SqliteStore, path: &Path, out: &mut dyn Write) -> Result<()> {
    let snapshot = store.export_state().context("failed to read state")?;
    let json = serde_json::to_string_pretty(&snapshot).context("failed to encode state")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    writeln!(
        out,
        "Exported {} commits to {}",
        snapshot.commits.len(),
        path.display()
    )?;
    Ok(())
}

fn report_config_warnings(config: &RecastConfig) {
    for warning in validate_config(config) {
        eprintln!(
            "recast config warning [{}]: {}",
            warning.code, warning.message
        );
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt} [y/N] ")?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
