//! SimChart demo
//!
//! Seeds an in-memory collection with the default catalogue, signs in as the
//! requested role and prints that role's dashboard.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use simchart::policy::SectionValue;
use simchart::{
    seed_simulations, AuthService, Dashboard, InMemoryCollection, InMemoryCredentials,
    OpenOutcome, Role, SimChartConfig, SimulationStore,
};

/// Demo configuration
struct Config {
    /// Role to sign in as
    role: Role,
    /// Optional JSON config file
    config_path: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Student,
            config_path: None,
            log_level: "info".to_string(),
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--role" | "-r" => {
                if i + 1 < args.len() {
                    config.role = args[i + 1].parse().unwrap_or_else(|e| {
                        eprintln!("error: {e}");
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --role requires a value");
                    std::process::exit(1);
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--log-level" | "-l" => {
                if i + 1 < args.len() {
                    config.log_level = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("error: --log-level requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("simchart-demo - print a role-scoped simulation dashboard");
                println!();
                println!("USAGE:");
                println!("    simchart-demo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -r, --role <ROLE>         admin or student [default: student]");
                println!("    -c, --config <FILE>       JSON configuration file");
                println!("    -l, --log-level <LEVEL>   Log filter when RUST_LOG is unset [default: info]");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = match &args.config_path {
        Some(path) => SimChartConfig::from_json_file(path)?,
        None => SimChartConfig::default(),
    };

    let collection = Arc::new(InMemoryCollection::new());
    let report = seed_simulations(collection.as_ref(), &cfg)?;
    tracing::info!(created = report.created.len(), "demo collection seeded");

    let auth = AuthService::new(Arc::new(InMemoryCredentials::new()), collection.clone(), cfg.clone());
    let session = auth.signup(&format!("demo-{}@simchart.local", args.role), "demo-password", args.role)?;

    let store = SimulationStore::new(collection, cfg.clone());
    let stream = store.stream()?;
    let snapshot = stream.recv_timeout(Duration::from_secs(2))?;

    let dashboard = Dashboard::new(&session, store)?;
    println!("SimChart v{} - signed in as {}", env!("CARGO_PKG_VERSION"), dashboard.role());
    println!();

    for card in dashboard.cards(&snapshot) {
        let badge = if card.show_locked_badge { " [locked]" } else { "" };
        println!("{} {}{} ({})", card.id, card.title, badge, card.assigned_to);
        println!("    {}", card.description);

        match dashboard.open(&card.id)? {
            OpenOutcome::Opened(view) => {
                for section in &view.sections {
                    let marker = match (&section.value, section.locked) {
                        (SectionValue::Withheld, _) | (_, false) => "",
                        (SectionValue::Visible(_), true) => " (locked for students)",
                    };
                    println!("    {:<11} {}{}", section.label.label(), section.display(&cfg), marker);
                }
            }
            OpenOutcome::Locked(notice) => println!("    {}", notice.message),
            OpenOutcome::Hidden => {}
        }
        println!();
    }

    Ok(())
}
