//! Accord - provenance attestation, scope guarding and ballot certification
//!
//! Every command prints one JSON record per result on stdout and exits
//! non-zero unless all of them are ok. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use accord_core::attest::{keys, AttestationKey};
use accord_core::config::AccordConfig;
use accord_core::guard::CapabilityDescriptor;
use accord_core::pipeline::{PipelineRecord, Trace};
use accord_core::ErrorCode;

mod attest_cli;
mod ballot_cli;
mod guard_cli;

/// Modules that can be traced individually
#[derive(Debug, Clone, ValueEnum)]
enum TraceModule {
    Canonical,
    Guard,
    Attest,
    Tally,
    Pipeline,
    All,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "accord",
    about = "Provenance attestation, scope guarding and ballot certification for agent-maintained document stores",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Enable tracing (comma-separated: canonical,guard,attest,tally,pipeline,all)
    #[clap(long, value_delimiter = ',', global = true)]
    trace: Vec<TraceModule>,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Project root holding .accord/config.yml
    #[clap(long, default_value = ".", global = true)]
    project_dir: PathBuf,

    /// Use this global config file instead of the platform default
    #[clap(long, global = true)]
    global_config: Option<PathBuf>,

    /// Act under this charter instead of the configured one
    #[clap(long, global = true)]
    charter: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Generate an Ed25519 attestation key pair
    Keygen {
        /// Output directory (default: configured keys_dir)
        #[clap(long)]
        out_dir: Option<PathBuf>,

        /// Overwrite existing key files
        #[clap(long)]
        force: bool,
    },

    /// Attest artifacts and write their envelopes
    Build(attest_cli::BuildArgs),

    /// Verify envelopes against their artifacts
    Verify(attest_cli::VerifyArgs),

    /// Check writes and calls against the acting charter
    Guard {
        #[clap(subcommand)]
        command: guard_cli::GuardCommand,
    },

    /// Announce a ballot in its vote log
    Propose(ballot_cli::ProposeArgs),

    /// Cast a ranked vote
    Vote(ballot_cli::VoteArgs),

    /// Tally a ballot without writing anything
    Tally(ballot_cli::TallyArgs),

    /// Tally a ballot and attest the decision document
    Certify(ballot_cli::CertifyArgs),

    /// Certify a ballot and publish the winning draft with a summary
    Adopt(ballot_cli::AdoptArgs),
}

/// Initialize tracing with CLI flags
///
/// `--trace` switches to JSON output for the selected modules.
fn initialize_tracing(log_level: &LogLevel, trace_modules: &[TraceModule]) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());

    for module in trace_modules {
        let directive = match module {
            TraceModule::Canonical => "accord_core::canonical=trace",
            TraceModule::Guard => "accord_core::guard=trace",
            TraceModule::Attest => "accord_core::attest=trace",
            TraceModule::Tally => "accord_core::tally=trace",
            TraceModule::Pipeline => "accord_core::pipeline=trace",
            TraceModule::All => "accord_core=trace",
        };
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }

    // stdout carries records only
    if !trace_modules.is_empty() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
        tracing::info!(trace_modules = ?trace_modules, "accord tracing enabled");
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Settings shared by every command
pub(crate) struct Session {
    pub config: AccordConfig,
    pub charter: Option<PathBuf>,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let project_dir = absolutize(&cli.project_dir)?;
        let project_dir = project_dir.canonicalize().unwrap_or(project_dir);
        let global = match &cli.global_config {
            Some(path) => Some(absolutize(path)?),
            None => AccordConfig::global_config_path(),
        };
        let config = AccordConfig::load_from(&project_dir, global.as_deref())
            .with_context(|| format!("loading config for {}", project_dir.display()))?;
        let charter = match &cli.charter {
            Some(path) => Some(absolutize(path)?),
            None => config.charter.clone(),
        };
        Ok(Self { config, charter })
    }

    /// The acting capability: the charter's, or the operator's without one
    pub fn capability(&self) -> Result<CapabilityDescriptor, accord_core::guard::ScopeError> {
        match &self.charter {
            Some(path) => CapabilityDescriptor::from_charter_file(path, &self.config.base_dir),
            None => CapabilityDescriptor::operator(&self.config.base_dir),
        }
    }

    pub fn signing_key(&self, explicit: Option<&Path>) -> Result<AttestationKey, accord_core::attest::AttestError> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.keys_dir.join(keys::PRIVATE_KEY_FILE));
        let key = AttestationKey::load(&path)?;
        Ok(match &self.config.key_id {
            Some(id) => key.with_key_id(id.clone()),
            None => key,
        })
    }

    pub fn public_key_path(&self, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.keys_dir.join(keys::PUBLIC_KEY_FILE))
    }
}

pub(crate) fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(cwd.join(path))
}

/// Print one record as a JSON line
pub(crate) fn emit<T: Serialize>(record: &T) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

/// Record for a failure that happened before any pipeline work
pub(crate) fn failed(event: &'static str, code: ErrorCode, error: impl ToString) -> PipelineRecord {
    Trace::start(event).record(code, vec![error.to_string()])
}

fn keygen_command(session: &Session, out_dir: Option<PathBuf>, force: bool) -> Result<bool> {
    let dir = match out_dir {
        Some(dir) => absolutize(&dir)?,
        None => session.config.keys_dir.clone(),
    };
    let record = match keys::keygen(&dir, force) {
        Ok(paths) => Trace::start("keygen")
            .success()
            .with_file(paths.private_key.to_string_lossy())
            .with_detail("public_key", paths.public_key.to_string_lossy().into_owned())
            .with_detail("key_id", paths.key_id),
        Err(e) => failed("keygen", e.error_code(), &e),
    };
    emit(&record)?;
    Ok(record.ok)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, &cli.trace);

    let session = Session::load(&cli)?;
    let ok = match cli.command {
        Command::Keygen { out_dir, force } => keygen_command(&session, out_dir, force)?,
        Command::Build(args) => attest_cli::build(&session, args)?,
        Command::Verify(args) => attest_cli::verify(&session, args)?,
        Command::Guard { command } => command.execute(&session)?,
        Command::Propose(args) => ballot_cli::propose(&session, args)?,
        Command::Vote(args) => ballot_cli::vote(&session, args)?,
        Command::Tally(args) => ballot_cli::tally(&session, args)?,
        Command::Certify(args) => ballot_cli::certify(&session, args)?,
        Command::Adopt(args) => ballot_cli::adopt(&session, args)?,
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
