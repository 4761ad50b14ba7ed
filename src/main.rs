//! Firelet CLI entrypoint.
//!
//! This is the main entrypoint for the firelet command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use firelet::access::{Role, Session, UserDirectory};
use firelet::check::CheckEngine;
use firelet::cli::{
    Cli, Commands, OutputFormat, OutputFormatter, RuleCommands, UserCommands, VersionCommands,
};
use firelet::compiler::RuleCompiler;
use firelet::config::{
    find_config_file, ConfigParser, ConfigValidator, FireletConfig, RepositoryBackend,
};
use firelet::deploy::{DeployedStore, Deployer, SshTransport};
use firelet::error::{FireletError, Result, StoreError};
use firelet::messages::MessageLog;
use firelet::model::{Entity, Host, HostGroup, Network, Rule, Service, TableKind};
use firelet::pipeline::Pipeline;
use firelet::store::{
    EntityStore, GitRepository, MemoryRepository, PolicyRepository, RepositoryLock,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of a deployment that reached only part of the fleet.
const PARTIAL_DEPLOY_EXIT: u8 = 2;

/// Runs `$body` with `$ty` bound to the record type of `$table`.
macro_rules! with_entity {
    ($table:expr, $ty:ident => $body:block) => {
        match $table {
            TableKind::Hosts => {
                type $ty = Host;
                $body
            }
            TableKind::Networks => {
                type $ty = Network;
                $body
            }
            TableKind::HostGroups => {
                type $ty = HostGroup;
                $body
            }
            TableKind::Services => {
                type $ty = Service;
                $body
            }
            TableKind::Rules => {
                type $ty = Rule;
                $body
            }
        }
    };
}

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, matches!(cli.output, OutputFormat::Json));

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs and operator messages go to stderr.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Validate { warnings } => {
            cmd_validate(&config, warnings, &formatter)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::User { command } => {
            cmd_user(&config, command, &formatter).await?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    ConfigValidator::new().validate(&config)?;

    let pipeline = build_pipeline(&config).await?;
    let session = Session::new(config.author.clone(), Role::Admin);

    let lock = if mutates(&cli.command) && config.repository.backend == RepositoryBackend::Git {
        Some(RepositoryLock::acquire_for_process(&config.data_dir()).await?)
    } else {
        None
    };

    let result = dispatch(&pipeline, &session, cli.command, &formatter).await;

    if let Some(lock) = lock
        && let Err(e) = lock.release().await
    {
        warn!("Failed to release repository lock: {e}");
    }

    result
}

/// Loads the configuration file (or defaults), `.env` and command-line
/// overrides.
fn load_config(cli: &Cli) -> Result<FireletConfig> {
    let config_file = match &cli.config {
        Some(path) => Some(path.clone()),
        None => find_config_file(std::env::current_dir()?).ok(),
    };

    let base = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let mut config = match &config_file {
        Some(path) => {
            info!("Using configuration: {}", path.display());
            parser.load_with_env(path)?
        }
        None => {
            debug!("No configuration file found, using defaults");
            parser.defaults_with_env()?
        }
    };

    if let Some(path) = &cli.repository {
        config.repository.path.clone_from(path);
    }
    if let Some(author) = &cli.author {
        config.author.clone_from(author);
    }
    if config.repository.path.as_os_str().is_empty() {
        config.repository.path = config.data_dir();
    }

    Ok(config)
}

/// Assembles the store, compiler, deployer and message log.
async fn build_pipeline(config: &FireletConfig) -> Result<Pipeline> {
    let data_dir = config.data_dir();

    let repo: Arc<dyn PolicyRepository> = match config.repository.backend {
        RepositoryBackend::Git => Arc::new(GitRepository::open(data_dir.clone()).await?),
        RepositoryBackend::Memory => Arc::new(MemoryRepository::new()),
    };
    let store = Arc::new(EntityStore::open(repo).await?);
    info!(
        "Opened {} policy repository at {}",
        store.backend_type(),
        data_dir.display()
    );

    let compiler = RuleCompiler::new(config.compiler.default_policy);
    let transport = Arc::new(SshTransport::new(
        config.deploy.ssh_user.clone(),
        config.deploy.ssh_port,
        config.deploy.timeout(),
        config.deploy.apply_command.clone(),
    ));
    let deployer = Deployer::new(compiler, transport, DeployedStore::in_dir(&data_dir))
        .with_parallelism(config.deploy.parallelism)
        .with_timeout(config.deploy.timeout());

    Ok(Pipeline::new(
        store,
        CheckEngine::new(compiler),
        deployer,
        MessageLog::new(config.messages.capacity),
    ))
}

/// Whether a command writes to the policy repository.
const fn mutates(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Save { .. }
            | Commands::Reset
            | Commands::Deploy { .. }
            | Commands::Add { .. }
            | Commands::Update { .. }
            | Commands::Delete { .. }
            | Commands::Rule { .. }
            | Commands::Version {
                command: VersionCommands::Rollback { .. }
            }
    )
}

/// Runs a store-backed command.
#[allow(clippy::too_many_lines)]
async fn dispatch(
    pipeline: &Pipeline,
    session: &Session,
    command: Commands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    match command {
        Commands::Save { message } => {
            let commit = pipeline.save(session, &message).await?;
            emit(&formatter.success(&format!("Saved commit {}", commit.short_id())))?;
        }
        Commands::Reset => {
            pipeline.reset(session).await?;
        }
        Commands::SaveNeeded => {
            let text = if pipeline.save_needed(session).await? {
                "Uncommitted changes present."
            } else {
                "Save not needed."
            };
            emit(&formatter.success(text))?;
        }
        Commands::Version { command } => cmd_version(pipeline, session, command, formatter).await?,
        Commands::Compile { host } => {
            let compiled = pipeline.compile(session).await?;
            emit(&formatter.format_compiled(&compiled, host.as_deref()))?;
        }
        Commands::Check => {
            let report = pipeline.check(session).await?;
            emit(&formatter.format_check(&report))?;
        }
        Commands::Deploy { yes } => {
            let preview = pipeline.check(session).await?;
            if preview.is_clean() {
                info!("Deployed rulesets already match the working state");
            } else {
                emit(&formatter.format_check(&preview))?;
            }

            if !yes && !confirm("Deploy the working state to the fleet?")? {
                eprintln!("Deployment cancelled.");
                return Ok(ExitCode::SUCCESS);
            }

            let report = pipeline.deploy(session).await?;
            emit(&formatter.format_deploy(&report))?;
            if !report.success {
                return Ok(ExitCode::from(PARTIAL_DEPLOY_EXIT));
            }
        }
        Commands::List { table } => with_entity!(table, E => {
            let records = pipeline.list::<E>(session).await?;
            emit(&formatter.format_records(&records))?;
        }),
        Commands::Show { table, rid } => with_entity!(table, E => {
            let record = pipeline.fetch::<E>(session, rid).await?;
            emit(&formatter.format_record(&record))?;
        }),
        Commands::Add { table, file } => with_entity!(table, E => {
            let fields = read_fields::<E>(&file).await?;
            let rid = pipeline.add(session, fields).await?;
            emit(&formatter.success(&format!("Added {} {rid}", table.singular())))?;
        }),
        Commands::Update {
            table,
            rid,
            token,
            file,
        } => with_entity!(table, E => {
            let fields = read_fields::<E>(&file).await?;
            let token = pipeline.update(session, rid, fields, &token).await?;
            emit(&formatter.success(&format!(
                "Updated {} {rid}, new token {token}",
                table.singular()
            )))?;
        }),
        Commands::Delete { table, rid, token } => with_entity!(table, E => {
            pipeline.delete::<E>(session, rid, &token).await?;
            emit(&formatter.success(&format!("Deleted {} {rid}", table.singular())))?;
        }),
        Commands::Rule { command } => {
            let (rid, verb) = match command {
                RuleCommands::Enable { rid } => {
                    pipeline.enable(session, rid).await?;
                    (rid, "enabled")
                }
                RuleCommands::Disable { rid } => {
                    pipeline.disable(session, rid).await?;
                    (rid, "disabled")
                }
                RuleCommands::Moveup { rid } => {
                    pipeline.moveup(session, rid).await?;
                    (rid, "moved up")
                }
                RuleCommands::Movedown { rid } => {
                    pipeline.movedown(session, rid).await?;
                    (rid, "moved down")
                }
            };
            emit(&formatter.success(&format!("Rule {rid} {verb}")))?;
        }
        Commands::Validate { .. } | Commands::User { .. } => {
            debug!("Command handled before the pipeline was built");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Commit history commands.
async fn cmd_version(
    pipeline: &Pipeline,
    session: &Session,
    command: VersionCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    match command {
        VersionCommands::List { limit } => {
            let commits = pipeline.version_list(session, limit).await?;
            emit(&formatter.format_commits(&commits))?;
        }
        VersionCommands::Diff { reference } => {
            let diff = pipeline.version_diff(session, &reference).await?;
            emit(&formatter.format_version_diff(&diff))?;
        }
        VersionCommands::Rollback { reference, yes } => {
            let diff = pipeline.version_diff(session, &reference).await?;
            emit(&formatter.format_version_diff(&diff))?;

            if pipeline.save_needed(session).await? {
                warn!("Rollback discards uncommitted changes");
            }
            if !yes && !confirm(&format!("Roll back to {reference}?"))? {
                eprintln!("Rollback cancelled.");
                return Ok(());
            }

            let commit = pipeline.rollback(session, &reference).await?;
            emit(&formatter.success(&format!(
                "Rolled back to {reference} as commit {}",
                commit.short_id()
            )))?;
        }
    }
    Ok(())
}

/// User directory commands.
async fn cmd_user(
    config: &FireletConfig,
    command: UserCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let users = UserDirectory::in_dir(config.data_dir());

    match command {
        UserCommands::List => {
            let list = users.list().await?;
            emit(&formatter.format_users(&list))?;
        }
        UserCommands::Add {
            name,
            role,
            secret,
            email,
        } => {
            users.add(&name, role, &secret, &email).await?;
            emit(&formatter.success(&format!("Added user {name} ({role})")))?;
        }
        UserCommands::Del { name } => {
            users.delete(&name).await?;
            emit(&formatter.success(&format!("Deleted user {name}")))?;
        }
        UserCommands::Validate { name, secret } => {
            let session = users.login(&name, &secret).await?;
            emit(&formatter.success(&format!(
                "Valid credentials for {} ({})",
                session.user, session.role
            )))?;
        }
    }
    Ok(())
}

/// Validate the loaded configuration.
fn cmd_validate(
    config: &FireletConfig,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let result = ConfigValidator::new().validate(config)?;

    if result.is_valid() {
        emit(&formatter.success("Configuration is valid!"))?;
        if show_warnings {
            for warning in &result.warnings {
                emit(&formatter.warning(warning))?;
            }
        }
    }

    // Show summary
    eprintln!("\nConfiguration summary:");
    eprintln!("  Title: {}", config.title);
    eprintln!("  Data directory: {}", config.data_dir().display());
    eprintln!(
        "  Deploy: {}@*:{} ({}s timeout, {} in parallel)",
        config.deploy.ssh_user,
        config.deploy.ssh_port,
        config.deploy.timeout_secs,
        config.deploy.parallelism
    );
    eprintln!("  Default policy: {}", config.compiler.default_policy.as_str());

    Ok(())
}

/// Reads record fields from a YAML (or JSON) file.
async fn read_fields<E: Entity>(path: &Path) -> Result<E> {
    let content = tokio::fs::read_to_string(path).await?;
    serde_yaml::from_str(&content).map_err(|e| {
        FireletError::from(StoreError::validation(
            E::KIND.as_str(),
            "file",
            format!("{}: {e}", path.display()),
        ))
    })
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Writes a command result to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}
