//! carbon-shift entry point: CLI parsing, logging and service wiring.

use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use carbon_shift::audit::{AuditLog, CsvAuditLog};
use carbon_shift::config::ServiceConfig;
use carbon_shift::forecast::FileForecastStore;
use carbon_shift::plan::{PlanBuilder, Trigger};
use carbon_shift::runner::{Orchestrator, RunOutcome, run_cron};
use carbon_shift::scheduler::{ActorDeps, JsonPlanStore, Scheduler, SchedulerSettings};

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    once: bool,
    tenant: Option<String>,
    #[cfg(feature = "api")]
    serve: bool,
    #[cfg(feature = "api")]
    port: Option<u16>,
}

fn print_help() {
    eprintln!("carbon-shift: carbon-aware load shifting scheduler");
    eprintln!();
    eprintln!("Usage: carbon-shift [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load service configuration from a TOML file");
    eprintln!("  --once                   Reoptimize once from the stored forecast and exit");
    eprintln!("  --tenant <name>          Tenant for --once and the cron loop");
    #[cfg(feature = "api")]
    {
        eprintln!("  --serve                  Start the REST API server");
        eprintln!("  --port <u16>             API server port (overrides [server] port)");
    }
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("Without --once the process keeps tenant drift checks and the cron loop");
    eprintln!("running until Ctrl-C.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        once: false,
        tenant: None,
        #[cfg(feature = "api")]
        serve: false,
        #[cfg(feature = "api")]
        port: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    process::exit(1);
                }
                cli.config_path = Some(args[i].clone());
            }
            "--once" => {
                cli.once = true;
            }
            "--tenant" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --tenant requires a name argument");
                    process::exit(1);
                }
                cli.tenant = Some(args[i].clone());
            }
            #[cfg(feature = "api")]
            "--serve" => {
                cli.serve = true;
            }
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --port requires a u16 argument");
                    process::exit(1);
                }
                if let Ok(p) = args[i].parse::<u16>() {
                    cli.port = Some(p);
                } else {
                    eprintln!("error: --port value \"{}\" is not a valid u16", args[i]);
                    process::exit(1);
                }
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("carbon_shift={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: CliArgs, config: ServiceConfig) -> Result<(), String> {
    let storage = &config.storage;
    let forecasts = Arc::new(FileForecastStore::new(&storage.forecast_path));
    let builder = Arc::new(PlanBuilder::from_config(forecasts, &config));
    let audit: Arc<dyn AuditLog> = Arc::new(CsvAuditLog::new(&storage.audit_path));
    let scheduler = Arc::new(Scheduler::new(ActorDeps {
        store: Arc::new(JsonPlanStore::new(&storage.state_dir)),
        builder: Arc::clone(&builder),
        audit: Arc::clone(&audit),
        settings: SchedulerSettings::from(&config.scheduler),
    }));
    let orchestrator = Arc::new(Orchestrator::new(builder, scheduler, audit));

    if cli.once {
        return match orchestrator
            .run_reoptimization(cli.tenant.as_deref(), Trigger::Manual, None)
            .await
        {
            Ok(RunOutcome::NothingToDo) => {
                info!(path = %storage.forecast_path.display(), "no forecast available");
                Ok(())
            }
            Ok(RunOutcome::Applied(applied)) => {
                let m = applied.plan.metrics;
                info!(
                    tenant = %applied.receipt.tenant,
                    version = applied.receipt.version,
                    peak_reduction_pct = m.peak_reduction_pct,
                    renewable_gain_pct = m.renewable_gain_pct,
                    co2_avoided_kg = m.co2_avoided_kg,
                    "plan applied"
                );
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        };
    }

    // Re-arm persisted drift checks of every saved tenant.
    if let Err(e) = orchestrator.scheduler().restore().await {
        warn!(dir = %storage.state_dir.display(), error = %e, "cannot list saved tenants");
    }

    let cron = config.scheduler.cron_interval().map(|every| {
        info!(every_secs = every.as_secs(), "cron reoptimization enabled");
        tokio::spawn(run_cron(
            Arc::clone(&orchestrator),
            cli.tenant.clone(),
            every,
        ))
    });

    #[cfg(feature = "api")]
    if cli.serve {
        let port = cli.port.unwrap_or(config.server.port);
        let addr: std::net::SocketAddr = format!("{}:{port}", config.server.bind)
            .parse()
            .map_err(|e| format!("invalid bind address \"{}\": {e}", config.server.bind))?;
        let state = Arc::new(carbon_shift::api::AppState {
            orchestrator,
            summarizer: None,
        });
        let served = carbon_shift::api::serve(state, addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C, stopping server");
            }
        })
        .await;
        if let Some(cron) = cron {
            cron.abort();
        }
        return served.map_err(|e| format!("server error on {addr}: {e}"));
    }

    info!("scheduler running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("cannot listen for Ctrl-C: {e}"))?;
    if let Some(cron) = cron {
        cron.abort();
    }
    info!("shutting down");
    Ok(())
}

fn main() {
    let cli = parse_args();

    let config = if let Some(ref path) = cli.config_path {
        match ServiceConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ServiceConfig::default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    init_logging(&config.logging.level);

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    if let Err(e) = rt.block_on(run(cli, config)) {
        error!("{e}");
        process::exit(1);
    }
}
