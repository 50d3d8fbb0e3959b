//! workspace-hub CLI entry point

use std::process::ExitCode;

use clap::Parser;

use workspace_hub::cli::{Cli, Commands, ResolveArgs, UserArgs};
use workspace_hub::paths::resolve_in_root;
use workspace_hub::{ProvisionOutcome, Result};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "workspace_hub=debug"
    } else {
        "workspace_hub=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<String> {
    match cli.command {
        Commands::Provision(args) => run_provision(args).await,
        Commands::Save(args) => run_save(args).await,
        Commands::Resolve(args) => run_resolve(args),
    }
}

async fn run_provision(args: UserArgs) -> Result<String> {
    let provisioner = args.storage.provisioner()?;
    let workspace = provisioner.ensure_workspace(&args.user).await?;

    let outcome = match workspace.outcome {
        ProvisionOutcome::Existing => "existing workspace, storage not contacted".to_string(),
        ProvisionOutcome::UserNamespace(n) => format!("seeded {} files from user namespace", n),
        ProvisionOutcome::DefaultNamespace(n) => {
            format!("seeded {} files from default namespace", n)
        }
        ProvisionOutcome::Empty => "empty workspace".to_string(),
    };
    Ok(format!("{}\n{}", workspace.root.display(), outcome))
}

async fn run_save(args: UserArgs) -> Result<String> {
    let provisioner = args.storage.provisioner()?;
    let uploaded = provisioner.save_workspace(&args.user).await?;
    Ok(format!("uploaded {} files for {}", uploaded, args.user))
}

fn run_resolve(args: ResolveArgs) -> Result<String> {
    let resolved = resolve_in_root(&args.path, &args.root)?;
    Ok(resolved.display().to_string())
}
