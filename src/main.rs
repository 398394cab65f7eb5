//! Process entry point. Wires the concrete AWS-SDK clients (§6) into the
//! shared [`log_distributor::orchestrator::Orchestrator`] and dispatches to
//! whichever [`log_distributor::host::RuntimeHost`] `EXECUTION_MODE` selects
//! (§2, §A.4).

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use clap::Parser;
use log_distributor::aws::{
    CloudWatchLogServiceClient, KeyedStoreConfigClient, S3BucketLister, S3ObjectStoreClient,
    SqsQueueClient, StsCredentialExchangeClient,
};
use log_distributor::clients::RawMessage;
use log_distributor::config::{Config, ExecutionMode};
use log_distributor::credential_broker::CredentialBroker;
use log_distributor::host::{
    healthcheck, InMemoryScanCursorStore, PollHost, RunnerClients, RuntimeHost, ScanHost,
    TriggeredHost,
};
use log_distributor::orchestrator::Orchestrator;
use log_distributor::tenant_config_resolver::TenantConfigResolver;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Multi-tenant log router: fans out newly created log files to tenant-owned
/// delivery destinations.
#[derive(Debug, Parser)]
#[command(name = "log-distributor", version)]
struct Cli {
    /// Run the connectivity check instead of processing notifications.
    #[arg(long)]
    healthcheck: bool,
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

async fn build_clients(config: &Config) -> Arc<RunnerClients> {
    let region = config
        .aws_region
        .clone()
        .map(aws_types::region::Region::new);

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region.clone() {
        loader = loader.region(region);
    }
    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let shared_config = loader.load().await;

    let s3_client = aws_sdk_s3::Client::new(&shared_config);
    let sts_client = aws_sdk_sts::Client::new(&shared_config);
    let sqs_client = aws_sdk_sqs::Client::new(&shared_config);

    let bucket_lister = Arc::new(S3BucketLister::new(s3_client.clone()));
    let object_store = Arc::new(S3ObjectStoreClient::new(
        s3_client,
        config.aws_s3_use_path_style,
    ));
    let credential_exchange = Arc::new(StsCredentialExchangeClient::new(sts_client));
    let config_store = Arc::new(KeyedStoreConfigClient::new(
        region.unwrap_or_else(|| aws_types::region::Region::new("us-east-1")),
    ));
    let queue = Arc::new(SqsQueueClient::new(sqs_client));
    let log_service = Arc::new(CloudWatchLogServiceClient::new());
    let credential_broker = Arc::new(CredentialBroker::new(
        credential_exchange,
        config.central_log_distribution_role_arn.clone(),
    ));

    Arc::new(RunnerClients {
        object_store,
        config_store,
        queue,
        log_service,
        credential_broker,
        bucket_lister,
    })
}

fn build_orchestrator(config: &Config, clients: &RunnerClients) -> Orchestrator {
    let config_resolver = TenantConfigResolver::new(clients.config_store.clone());
    Orchestrator::new(
        clients.object_store.clone(),
        config_resolver,
        clients.credential_broker.clone(),
        clients.log_service.clone(),
        clients.queue.clone(),
        config.retry_attempts,
        config.max_batch_size,
    )
}

/// Reads one JSON array of `{"id", "body", "receipt"}` messages from stdin,
/// the local equivalent of a host runtime's triggered-mode batch handoff
/// (§2.1); returns a non-zero exit code if any message dies non-recoverably
/// is left to the host runtime to classify via its own structured response,
/// so this just logs per-message verdicts and exits 0 once all are disposed.
async fn run_triggered(config: &Config, clients: Arc<RunnerClients>) -> ExitCode {
    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        error!(error = %err, "failed to read triggered-mode batch from stdin");
        return ExitCode::FAILURE;
    }

    let batch: Vec<RawMessage> = match serde_json::from_str(&input) {
        Ok(batch) => batch,
        Err(err) => {
            error!(error = %err, "triggered-mode stdin payload is not a valid message batch");
            return ExitCode::FAILURE;
        }
    };

    let queue_url = config.sqs_queue_url.clone().unwrap_or_default();
    let host = TriggeredHost {
        orchestrator: build_orchestrator(config, &clients),
        queue: clients.queue.clone(),
        queue_url,
        batch,
    };

    match host.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "triggered-mode run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_poll(config: &Config, clients: Arc<RunnerClients>) -> ExitCode {
    let shutdown = tokio_util::sync::CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining in-flight notifications");
            signal_shutdown.cancel();
        }
    });

    let host = PollHost {
        orchestrator: build_orchestrator(config, &clients),
        queue: clients.queue.clone(),
        queue_url: config.sqs_queue_url.clone().expect("validated by Config::from_env"),
        max_messages: 10,
        poll_interval: config.scan_interval,
        shutdown,
    };

    match host.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "poll-mode run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_scan(config: &Config, clients: Arc<RunnerClients>) -> ExitCode {
    let Some(source_bucket) = config.source_bucket.clone() else {
        error!("SOURCE_BUCKET must be set to run in scan mode");
        return ExitCode::FAILURE;
    };

    let shutdown = tokio_util::sync::CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, finishing in-flight scan pass");
            signal_shutdown.cancel();
        }
    });

    let host = ScanHost {
        orchestrator: build_orchestrator(config, &clients),
        source_bucket,
        scan_interval: config.scan_interval,
        cursor_store: Arc::new(InMemoryScanCursorStore::default()),
        lister: clients.bucket_lister.clone(),
        shutdown,
    };

    match host.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "scan-mode run failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    install_tracing();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error, refusing to start");
            return ExitCode::FAILURE;
        }
    };

    info!(
        mode = ?config.execution_mode,
        poll_interval = %humantime::format_duration(config.scan_interval),
        "starting log-distributor",
    );

    let clients = build_clients(&config).await;

    if cli.healthcheck {
        return match healthcheck(&clients, &config.tenant_config_table).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "healthcheck failed");
                ExitCode::FAILURE
            }
        };
    }

    match config.execution_mode {
        ExecutionMode::Triggered => run_triggered(&config, clients).await,
        ExecutionMode::Poll => run_poll(&config, clients).await,
        ExecutionMode::Scan => run_scan(&config, clients).await,
    }
}
