use crate::auth::{Auth, NullAuth};
use crate::config::chroots::{ChrootConfig, Namespace, NAMESPACE_SEPARATOR};
use crate::config::keyfile::Keyfile;
use crate::config::paths::Paths;
use crate::config::types::{Operation, SessionError, Verbosity};
use crate::session::Session;
use crate::utils::environment::Environment;
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Chroot selected when none is named
const DEFAULT_CHROOT: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "rschroot", author, version, about, long_about = None)]
#[command(group(ArgGroup::new("action").multiple(false).args([
    "list", "info", "config", "location", "begin_session", "recover_session",
    "run_session", "end_session", "automatic_session",
])))]
pub struct Cli {
    /// Use the specified chroot (repeatable)
    #[arg(short = 'c', long = "chroot", value_name = "CHROOT")]
    chroot: Vec<String>,
    /// Select all chroots, source chroots and sessions
    #[arg(short = 'a', long)]
    all: bool,
    /// Select all chroots
    #[arg(long)]
    all_chroots: bool,
    /// Select all source chroots
    #[arg(long)]
    all_source_chroots: bool,
    /// Select all active sessions
    #[arg(long)]
    all_sessions: bool,
    /// Username (default current user)
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,
    /// Preserve user environment
    #[arg(short = 'p', long)]
    preserve_environment: bool,
    /// Directory to use inside the chroot
    #[arg(short = 'd', long, value_name = "DIR")]
    directory: Option<PathBuf>,
    /// Show less output
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,
    /// Show more output
    #[arg(short = 'v', long)]
    verbose: bool,
    /// List available chroots
    #[arg(short = 'l', long)]
    list: bool,
    /// Show information about selected chroots
    #[arg(short = 'i', long)]
    info: bool,
    /// Dump configuration of selected chroots
    #[arg(long)]
    config: bool,
    /// Print location of selected chroots
    #[arg(long)]
    location: bool,
    /// Read chroot definitions from FILE instead of the system configuration
    #[arg(long = "config-file", value_name = "FILE")]
    config_file: Vec<PathBuf>,
    /// Begin a session; returns a session ID
    #[arg(short = 'b', long)]
    begin_session: bool,
    /// Recover an existing session
    #[arg(long)]
    recover_session: bool,
    /// Run an existing session
    #[arg(short = 'r', long)]
    run_session: bool,
    /// End an existing session
    #[arg(short = 'e', long)]
    end_session: bool,
    /// Begin, run and end a session (default)
    #[arg(long)]
    automatic_session: bool,
    /// Session name (defaults to an automatically generated name)
    #[arg(short = 'n', long, value_name = "NAME")]
    session_name: Option<String>,
    /// Set option KEY to VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    option: Vec<(String, String)>,
    /// Command to run; a login shell when empty
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_option(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("{}: option must be KEY=VALUE", s)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    List,
    Info,
    Config,
    Location,
    Session(Operation),
}

impl Cli {
    fn action(&self) -> Action {
        if self.list {
            Action::List
        } else if self.info {
            Action::Info
        } else if self.config {
            Action::Config
        } else if self.location {
            Action::Location
        } else if self.begin_session {
            Action::Session(Operation::Begin)
        } else if self.recover_session {
            Action::Session(Operation::Recover)
        } else if self.run_session {
            Action::Session(Operation::Run)
        } else if self.end_session {
            Action::Session(Operation::End)
        } else {
            Action::Session(Operation::Automatic)
        }
    }

    fn verbosity(&self) -> Option<Verbosity> {
        if self.quiet {
            Some(Verbosity::Quiet)
        } else if self.verbose {
            Some(Verbosity::Verbose)
        } else {
            None
        }
    }

    /// Namespaces selected by the --all* flags
    fn selected_namespaces(&self) -> Vec<Namespace> {
        if self.all {
            return Namespace::ALL.to_vec();
        }
        let mut namespaces = Vec::new();
        if self.all_chroots {
            namespaces.push(Namespace::Chroot);
        }
        if self.all_source_chroots {
            namespaces.push(Namespace::Source);
        }
        if self.all_sessions {
            namespaces.push(Namespace::Session);
        }
        namespaces
    }
}

/// Names the action applies to, as given or expanded from --all*
fn requested_chroots(cli: &Cli, action: Action, config: &ChrootConfig) -> Vec<String> {
    let namespaces = cli.selected_namespaces();
    if !namespaces.is_empty() {
        let mut names = cli.chroot.clone();
        for ns in namespaces {
            names.extend(config.chroot_list(ns));
        }
        return names;
    }
    if !cli.chroot.is_empty() {
        return cli.chroot.clone();
    }
    match action {
        Action::List | Action::Info | Action::Config => [Namespace::Chroot, Namespace::Source]
            .into_iter()
            .flat_map(|ns| config.chroot_list(ns))
            .collect(),
        Action::Location | Action::Session(_) => vec![DEFAULT_CHROOT.to_string()],
    }
}

fn init_logging(verbosity: Option<Verbosity>) {
    let level = match verbosity {
        Some(Verbosity::Quiet) => "error",
        Some(Verbosity::Verbose) => "info",
        _ => "warn",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

/// Parse the command line and act on it
///
/// Returns the exit status for the process.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());
    execute(cli, Paths::default())
}

fn execute(cli: Cli, paths: Paths) -> Result<i32> {
    let action = cli.action();
    let config = ChrootConfig::load(&paths, &cli.config_file, true)
        .context("failed to load chroot configuration")?;

    let default_ns = match action {
        Action::Session(op) if op.uses_existing_session() => Namespace::Session,
        _ => Namespace::Chroot,
    };
    let requested = requested_chroots(&cli, action, &config);
    let qualified = config.validate_chroots(default_ns, &requested)?;

    match action {
        Action::List => {
            for name in &qualified {
                println!("{}", name);
            }
        }
        Action::Info => {
            for (index, name) in qualified.iter().enumerate() {
                let chroot = config
                    .find_chroot(default_ns, name)
                    .ok_or_else(|| SessionError::ChrootUnknown(name.clone()))?;
                if index > 0 {
                    println!();
                }
                let heading = match name.split_once(NAMESPACE_SEPARATOR) {
                    Some(("session", _)) => "Session",
                    Some(("source", _)) => "Source",
                    _ => "Chroot",
                };
                println!("  --- {} ---", heading);
                for (label, value) in chroot.details() {
                    println!("  {:<24}{}", label, value);
                }
            }
        }
        Action::Config => {
            let mut keyfile = Keyfile::new();
            for name in &qualified {
                if let Some(chroot) = config.find_chroot(default_ns, name) {
                    chroot.keyfile_get(&mut keyfile);
                }
            }
            print!("{}", keyfile);
        }
        Action::Location => {
            for name in &qualified {
                let chroot = config
                    .find_chroot(default_ns, name)
                    .ok_or_else(|| SessionError::ChrootUnknown(name.clone()))?;
                match chroot.path() {
                    Some(path) => println!("{}", path.display()),
                    None => log::warn!("{}: chroot has no location", chroot.name()),
                }
            }
        }
        Action::Session(operation) => {
            return run_session(cli, config, paths, requested, operation);
        }
    }
    Ok(0)
}

fn run_session(
    cli: Cli,
    config: ChrootConfig,
    paths: Paths,
    chroots: Vec<String>,
    operation: Operation,
) -> Result<i32> {
    if cli.session_name.is_some() {
        if operation != Operation::Begin {
            bail!("--session-name is only valid with --begin-session");
        }
        if chroots.len() != 1 {
            bail!("--session-name requires a single chroot");
        }
    }

    let verbosity = cli.verbosity();
    let mut auth = Auth::new(Box::new(NullAuth::new()))?;
    if let Some(user) = &cli.user {
        auth.set_user(user)?;
    }
    auth.set_command(cli.command);
    auth.set_environment(Environment::from_process());
    if let Some(verbosity) = verbosity {
        auth.set_verbosity(verbosity);
    }

    let mut session = Session::new(auth, config, paths, chroots, operation);
    session.set_session_name(cli.session_name);
    session.set_verbosity(verbosity);
    session.set_directory(cli.directory);
    session.set_preserve_environment(cli.preserve_environment);
    session.set_user_options(cli.option);

    session.run()?;
    Ok(session.child_status())
}
