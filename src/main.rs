use clap::{Arg, Command};
use log::LevelFilter;
use portvakt::config::Config;
use portvakt::inbound::InboundOrchestrator;
use portvakt::mailbox::MailboxConnector;
use portvakt::outbound::{BulkSendRequest, OutboundGateway};
use portvakt::record::{JsonFileStore, RecordBuilder};
use portvakt::retry::RetryScheduler;
use portvakt::smtp::SmtpMailer;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let matches = Command::new("portvakt")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Email bridge for the property-management backend: polls the shared inbox into pending records and delivers bulk notifications with retry")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/portvakt.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("poll-once")
                .long("poll-once")
                .help("Run one inbound pass immediately and print the report")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("send")
                .long("send")
                .value_name("FILE")
                .help("Send one bulk notification described by a YAML request file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        generate_default_config(path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration from {config_path}: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        let problems = config.validate();
        if problems.is_empty() {
            println!("Configuration OK: {config_path}");
            return;
        }
        for problem in &problems {
            eprintln!("Configuration problem: {problem}");
        }
        process::exit(1);
    }

    let app = match App::build(&config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Startup error: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("poll-once") {
        let report = app.orchestrator.run_pass().await;
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        if report.aborted.is_some() {
            process::exit(1);
        }
        return;
    }

    if let Some(request_path) = matches.get_one::<String>("send") {
        let request = match load_request(request_path) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error loading send request from {request_path}: {e}");
                process::exit(1);
            }
        };
        let outcome = app.gateway.send(&request).await;
        println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
        // Queued batches need the scheduler alive; drain them before exit.
        while app.scheduler.queued() > 0 {
            tokio::time::sleep(Duration::from_secs(config.outbound.retry_interval_secs)).await;
            app.scheduler.process_due().await;
        }
        return;
    }

    run_daemon(app, &config).await;
}

struct App {
    orchestrator: Arc<InboundOrchestrator>,
    scheduler: Arc<RetryScheduler>,
    gateway: OutboundGateway,
}

impl App {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(JsonFileStore::open(&config.store_path)?);
        let mailer: Arc<SmtpMailer> = Arc::new(SmtpMailer::new(&config.smtp)?);

        let scheduler = Arc::new(RetryScheduler::new(
            mailer.clone(),
            config.outbound.chunk_size,
            Duration::from_millis(config.outbound.chunk_pause_ms),
        ));
        let gateway = OutboundGateway::new(
            mailer,
            scheduler.clone(),
            Duration::from_secs(config.outbound.send_timeout_secs),
        );
        let orchestrator = Arc::new(InboundOrchestrator::new(
            MailboxConnector::new(config.mailbox.clone()),
            RecordBuilder::new(store),
        ));

        Ok(App {
            orchestrator,
            scheduler,
            gateway,
        })
    }
}

async fn run_daemon(app: App, config: &Config) {
    let problems = config.validate();
    for problem in &problems {
        log::error!("Configuration problem: {problem}");
    }
    if !problems.is_empty() {
        process::exit(1);
    }

    log::info!(
        "Starting portvakt: polling {} every {}s, retry tick every {}s",
        config.mailbox.host,
        config.inbound.poll_interval_secs,
        config.outbound.retry_interval_secs
    );

    let inbound = tokio::spawn(
        app.orchestrator
            .clone()
            .run_scheduled(Duration::from_secs(config.inbound.poll_interval_secs)),
    );
    let retry = tokio::spawn(
        app.scheduler
            .clone()
            .run_scheduled(Duration::from_secs(config.outbound.retry_interval_secs)),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for shutdown signal: {e}");
    }
    log::info!("Shutting down");
    inbound.abort();
    retry.abort();
}

fn generate_default_config(path: &str) {
    match Config::default().to_file(path) {
        Ok(()) => {
            println!("Generated default configuration: {path}");
            println!("Fill in the mailbox and SMTP credentials before starting.");
        }
        Err(e) => {
            eprintln!("Error generating configuration: {e}");
            process::exit(1);
        }
    }
}

fn load_request(path: &str) -> anyhow::Result<BulkSendRequest> {
    let content = std::fs::read_to_string(path)?;
    let request: BulkSendRequest = serde_yaml::from_str(&content)?;
    Ok(request)
}
