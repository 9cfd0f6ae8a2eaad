use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use catalog::{BankCatalog, CatalogBank};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{EnvFilter, fmt};
use wizard::{
    ContactChannel, FileStore, MemoryStore, Services, SessionStore, SimulatedBallotBox,
    SimulatedOtp, Step, VoterSession, Wizard, WizardConfig,
};

/// Walks one voter through the whole wizard against the simulated services.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "ge2024")]
    election: String,

    #[arg(long, default_value = "Mumbai North")]
    constituency: String,

    #[arg(long, default_value = "c6")]
    candidate: String,

    /// Keep the session in this directory so a later run resumes it.
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Catalog JSON file instead of the built-in elections.
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, default_value = "voter-1")]
    session: String,

    #[arg(long, default_value = "+91 98200 12345")]
    phone: String,

    /// Try a wrong OTP before the right one.
    #[arg(long)]
    wrong_code: bool,

    /// Write the catalog as JSON (usable as `CATALOG_PATH`) and exit.
    #[arg(long)]
    export_catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = WizardConfig::default();

    let bank = match &args.catalog {
        Some(path) => CatalogBank::from_file(path)
            .with_context(|| format!("reading catalog {}", path.display()))?,
        None => CatalogBank::builtin(),
    };

    if let Some(path) = &args.export_catalog {
        bank.write_file(path)
            .with_context(|| format!("writing catalog {}", path.display()))?;
        println!("Catalog written to {}", path.display());
        return Ok(());
    }
    let catalog = Arc::new(
        BankCatalog::new(bank).with_latency(config.election_latency, config.candidate_latency),
    );
    let expected = config.verification_tick * config.verification_ticks();
    let otp = Arc::new(SimulatedOtp::new(&config));
    let store: Arc<dyn SessionStore> = match &args.session_dir {
        Some(dir) => Arc::new(FileStore::open(dir).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let services = Services {
        elections: catalog.clone(),
        candidates: catalog,
        otp: otp.clone(),
        ballot_box: Arc::new(SimulatedBallotBox::new(config.submission_latency)),
        store,
    };

    let voter = VoterSession::authenticated(&args.session, ContactChannel::Phone(args.phone.clone()));
    let mut wizard = Wizard::resume(&voter, services, config).await?;

    if let Some(notice) = wizard.last_error() {
        println!("! {}", notice.message);
    }
    if let Some(id) = wizard.confirmation_id() {
        println!("Vote already recorded, confirmation {id}");
        return Ok(());
    }

    println!("Session {} at step {}", wizard.session_id(), wizard.step());

    loop {
        match wizard.step() {
            Step::SelectElection => {
                for election in &wizard.elections().items {
                    println!("  {} {} ({})", election.id, election.title, election.status);
                }
                wizard.select_election(&args.election).await?;
            }
            Step::SelectConstituency => {
                wizard.select_constituency(&args.constituency).await?;
            }
            Step::VerifyIdentity => verify_identity(&mut wizard, expected).await?,
            Step::CastVote => {
                for candidate in wizard.visible_candidates() {
                    println!("  {} {} ({})", candidate.id, candidate.name, candidate.party);
                }
                wizard.select_candidate(&args.candidate).await?;
            }
            Step::Confirm => {
                let confirmation_id = confirm(&mut wizard, &otp, args.wrong_code).await?;
                println!("\nVote recorded, confirmation {confirmation_id}");
                return Ok(());
            }
        }

        wizard.next().await?;
        println!("Step {}", wizard.step());
    }
}

async fn verify_identity(wizard: &mut Wizard, expected: Duration) -> Result<()> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}",
        )?
        .progress_chars("=> "),
    );
    pb.set_message(format!("Verifying identity (~{:.1}s)", expected.as_secs_f32()));

    let mut updates = wizard.verification_updates();
    let bar = pb.clone();
    let watcher = tokio::spawn(async move {
        loop {
            bar.set_position(u64::from(*updates.borrow_and_update()));
            if updates.changed().await.is_err() {
                break;
            }
        }
    });

    wizard.wait_for_verification().await?;
    watcher.abort();

    pb.set_position(100);
    pb.finish_with_message("Identity verified");

    Ok(())
}

async fn confirm(wizard: &mut Wizard, otp: &SimulatedOtp, wrong_code: bool) -> Result<String> {
    if !wizard.state().otp_verified {
        let delivery = wizard.send_code().await?;
        let code = otp.inbox(&delivery).context("no code was delivered")?;
        println!("Code sent ({delivery})");

        if wrong_code {
            let wrong = if code == "000000" { "111111" } else { "000000" };
            match wizard.verify_code(wrong).await {
                Ok(()) => bail!("wrong code {wrong} was accepted"),
                Err(e) => println!("Rejected {wrong}: {e}"),
            }
        }

        wizard.verify_code(&code).await?;
        println!("Code accepted");
    }

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Submitting vote");

    let confirmation_id = wizard.confirm_vote().await?;
    spinner.finish_with_message("Submitted");

    Ok(confirmation_id)
}
