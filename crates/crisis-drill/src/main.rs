//! Drill harness for the crisis engine
//!
//! Runs the engine against a JSON ledger on disk with a dispatcher that
//! prints host requests instead of dialing. Useful for rehearsing crisis
//! flows and inspecting the ledger between runs.
//!
//! ```bash
//! crisis-drill assess phq9 2 2 2 2 2 2 2 2 2
//! crisis-drill activate --severity severe
//! crisis-drill stale <event-id> --still-active
//! crisis-drill history --days 7
//! crisis-drill verify
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use crisis_engine::{
    AssessmentKind, Collaborators, CrisisDataStore, CrisisEngine, CrisisResources,
    CrisisSeverity, CrisisTrigger, EmergencyContact, EngineConfig, EngineResult, FallbackNotice,
    FallbackSink, HostRequest, InterventionDispatcher, InterventionKind, JsonFileRepository,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML engine config; defaults overlaid with CRISIS_* env vars otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger file (overrides CRISIS_STATE_PATH)
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Emergency contacts as NAME=PHONE, repeatable
    #[arg(long = "contact")]
    contacts: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify questionnaire answers and act on the result
    Assess {
        #[arg(value_enum)]
        kind: KindArg,
        answers: Vec<u8>,
    },
    /// Screen free text for crisis language
    Screen { text: String },
    /// Open a crisis directly, as the crisis button does
    Activate {
        #[arg(long, value_enum, default_value_t = SeverityArg::Severe)]
        severity: SeverityArg,
        #[arg(long, value_enum, default_value_t = TriggerArg::UserActivated)]
        trigger: TriggerArg,
        /// Follow-up actions to run after the primary one
        #[arg(long = "then")]
        follow_ups: Vec<String>,
    },
    /// Confirm or close an event left open by a previous run
    Stale {
        event_id: String,
        #[arg(long, default_value_t = false)]
        still_active: bool,
    },
    /// List crisis events, newest first
    History {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Aggregate crisis statistics
    Stats,
    /// Verify the audit trail hash chain
    Verify,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Phq9,
    Gad7,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SeverityArg {
    Mild,
    Moderate,
    Severe,
    Critical,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TriggerArg {
    UserActivated,
    ScoreThreshold,
    SuicidalIdeation,
    ManualAssessment,
    SystemDetection,
}

impl From<KindArg> for AssessmentKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Phq9 => Self::Phq9,
            KindArg::Gad7 => Self::Gad7,
        }
    }
}

impl From<SeverityArg> for CrisisSeverity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Mild => Self::Mild,
            SeverityArg::Moderate => Self::Moderate,
            SeverityArg::Severe => Self::Severe,
            SeverityArg::Critical => Self::Critical,
        }
    }
}

impl From<TriggerArg> for CrisisTrigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::UserActivated => Self::UserActivated,
            TriggerArg::ScoreThreshold => Self::ScoreThreshold,
            TriggerArg::SuicidalIdeation => Self::SuicidalIdeation,
            TriggerArg::ManualAssessment => Self::ManualAssessment,
            TriggerArg::SystemDetection => Self::SystemDetection,
        }
    }
}

/// Prints host requests as JSON lines on stdout.
struct PrintDispatcher;

impl FallbackSink for PrintDispatcher {
    fn present_fallback(&self, notice: &FallbackNotice, reason: &str) {
        warn!(reason, "Presenting minimum viable notice");
        println!("{}", notice.message);
    }
}

#[async_trait]
impl InterventionDispatcher for PrintDispatcher {
    async fn dispatch(&self, request: HostRequest) -> EngineResult<()> {
        match serde_json::to_string(&request) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Host request not printable"),
        }
        Ok(())
    }
}

/// Bundled resources plus contacts from the command line.
struct DrillStore {
    contacts: Vec<EmergencyContact>,
}

#[async_trait]
impl CrisisDataStore for DrillStore {
    async fn load_resources(&self) -> EngineResult<CrisisResources> {
        Ok(CrisisResources::bundled())
    }

    async fn load_contacts(&self) -> EngineResult<Vec<EmergencyContact>> {
        Ok(self.contacts.clone())
    }
}

fn parse_contacts(raw: &[String]) -> Result<Vec<EmergencyContact>> {
    raw.iter()
        .map(|entry| {
            let (name, phone) = entry
                .split_once('=')
                .with_context(|| format!("contact '{entry}' is not NAME=PHONE"))?;
            Ok(EmergencyContact::new(name.trim(), phone.trim()))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crisis_engine=info,crisis_drill=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    if let Some(path) = args.state_path {
        config.state_path = path;
    }

    let collaborators = Collaborators {
        dispatcher: Arc::new(PrintDispatcher),
        data_store: Arc::new(DrillStore {
            contacts: parse_contacts(&args.contacts)?,
        }),
        repository: Arc::new(JsonFileRepository::new(config.state_path.clone())),
    };
    let (engine, boot) = CrisisEngine::boot(config, collaborators).await?;
    for event in &boot.stale_events {
        info!(
            event_id = %event.id,
            severity = %event.severity,
            "Open crisis from a previous run; confirm with `stale`"
        );
    }

    match args.command {
        Command::Assess { kind, answers } => {
            let outcome = engine.submit_assessment(kind.into(), &answers).await?;
            print_json(&outcome)?;
        }
        Command::Screen { text } => {
            let outcome = engine.screen_text(&text).await?;
            print_json(&outcome)?;
        }
        Command::Activate {
            severity,
            trigger,
            follow_ups,
        } => {
            let report = engine
                .activate_intervention(trigger.into(), severity.into(), None)
                .await?;
            print_json(&report)?;
            for raw in follow_ups {
                let kind: InterventionKind = raw.parse()?;
                let action = engine.execute_action_detailed(kind).await;
                print_json(&action)?;
            }
        }
        Command::Stale {
            event_id,
            still_active,
        } => {
            let report = engine.confirm_stale_crisis(&event_id, still_active).await?;
            print_json(&report)?;
        }
        Command::History { days } => print_json(&engine.get_crisis_history(days)?)?,
        Command::Stats => print_json(&engine.get_crisis_stats()?)?,
        Command::Verify => {
            let verification = engine.verify_audit_trail()?;
            print_json(&verification)?;
            if !verification.valid {
                anyhow::bail!("audit trail failed verification");
            }
        }
    }

    Ok(())
}
