#![deny(
    dead_code,
    anonymous_parameters,
    deprecated_in_future,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    // missing_copy_implementations,
    // missing_debug_implementations,
    non_ascii_idents,
    // non_camel_case_types,
    unsafe_code,
    // non_snake_case,
    path_statements,
    trivial_numeric_casts,
    unstable_features,
    // unused_crate_dependencies,
    unused_extern_crates,
    unused_allocation,
    unused_import_braces,
    unused_imports,
    unused_must_use,
    unused_mut,
    // unused_qualifications,
    while_true,
)]

extern crate log as logcrate;

#[allow(macro_use_extern_crate)]
#[macro_use] extern crate diesel;

use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::crate_name;
use clap::ArgMatches;
use clap_complete::Shell;
use colored::Colorize;
use itertools::Itertools;
use logcrate::info;
use logcrate::warn;

mod bus;
mod cancellation;
mod cli;
mod config;
mod consts;
mod db;
mod embedding;
mod errors;
mod handlers;
mod orchestrator;
mod publisher;
mod scheduler;
mod schema;
mod status;
mod util;
mod vector_store;
mod worker_pool;

use crate::bus::fixture::FixtureBus;
use crate::bus::lapin_bus::LapinBus;
use crate::bus::Envelope;
use crate::bus::MessageBus;
use crate::bus::QueueName;
use crate::cancellation::CancellationRegistry;
use crate::config::Configuration;
use crate::config::NotValidatedConfiguration;
use crate::db::connection::DbPools;
use crate::db::models::JobSchedule;
use crate::db::models::RawExtractionRecord;
use crate::db::tenant_scope::TenantId;
use crate::embedding::EmbeddingProvider;
use crate::embedding::FixtureEmbeddingProvider;
use crate::handlers::fixture::FixtureExtractor;
use crate::handlers::fixture::FixtureTransformer;
use crate::handlers::HandlerRegistry;
use crate::handlers::ProviderDefinition;
use crate::handlers::StepSpec;
use crate::publisher::Publisher;
use crate::scheduler::Scheduler;
use crate::util::progress::ProgressBars;
use crate::vector_store::FixtureVectorStore;
use crate::vector_store::VectorStore;
use crate::worker_pool::WorkerPool;

/// Assembled process-wide state, built once at start-up and handed to whichever
/// subcommand needs it. Every field is reference-counted so the `worker start`/
/// `scheduler run` subcommands (the only ones that outlive a single call) can clone it
/// freely into spawned tasks.
struct App {
    config: Arc<Configuration>,
    db_pools: DbPools,
    bus: Arc<dyn MessageBus>,
    registry: Arc<HandlerRegistry>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    cancellation: Arc<CancellationRegistry>,
    publisher: Arc<Publisher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = env_logger::try_init();

    let cli = cli::cli();
    let cli = cli.get_matches();

    if let Some(("generate-completions", matches)) = cli.subcommand() {
        return generate_completions(matches);
    }

    let app = App::assemble().await.context("Assembling application state from configuration")?;

    let hide_bars = cli.is_present("hide_bars") || crate::util::stdout_is_pipe();
    let progressbars = ProgressBars::setup(app.config.progress_format().clone(), app.config.spinner_format().clone(), hide_bars);

    match cli.subcommand() {
        Some(("db", matches)) => crate::db::interface::interface(matches, &app.config)?,

        Some(("run-job", matches)) => run_job(&app, matches).await?,
        Some(("cancel-job", matches)) => cancel_job(&app, matches)?,
        Some(("status", matches)) => print_status(&app, matches)?,
        Some(("requeue-pending-raw", matches)) => requeue_pending_raw(&app, matches, &progressbars).await?,

        Some(("worker", matches)) => worker(&app, matches, &progressbars).await?,
        Some(("scheduler", matches)) => scheduler(&app, matches, &progressbars).await?,

        Some((other, _)) => return Err(anyhow!("Unknown subcommand: {}", other)),
        None => return Err(anyhow!("No subcommand")),
    }

    Ok(())
}

impl App {
    /// Loads configuration from `CONVEYOR_CONFIG` (default `./conveyor.toml`), layered
    /// with `CONVEYOR_*` environment overrides, then establishes every long-lived
    /// dependency: database pools, the message bus, the handler registry, the
    /// embedding/vector-store seams, and the progress publisher.
    ///
    /// The shipped handler registry only knows the illustrative `fixture` provider;
    /// a real deployment registers concrete provider adapters the same way before
    /// calling any subcommand that touches the pipeline.
    async fn assemble() -> Result<App> {
        let config_path = std::env::var("CONVEYOR_CONFIG").unwrap_or_else(|_| "conveyor.toml".to_string());

        let mut raw = ::config::Config::default();
        raw.merge(::config::File::with_name(&config_path).required(false))?
            .merge(::config::Environment::with_prefix("CONVEYOR"))?;

        let config: Arc<Configuration> = Arc::new(raw.try_into::<NotValidatedConfiguration>()?.validate()?);

        let db_pools = DbPools::establish(&config)?;

        let bus: Arc<dyn MessageBus> = if config.bus_url().starts_with("fixture://") {
            warn!("BUS_URL points at the in-memory fixture bus; this is not durable across restarts");
            Arc::new(FixtureBus::new())
        } else {
            Arc::new(LapinBus::connect(config.bus_url()).await?)
        };

        let mut registry = HandlerRegistry::new();
        registry.register(ProviderDefinition {
            provider: "fixture".to_string(),
            steps: vec![StepSpec {
                step_name: "work_items".to_string(),
                display_name: "Work items".to_string(),
                record_type: "work_item".to_string(),
                extractor: Arc::new(FixtureExtractor::new(Vec::new(), 100)),
                transformer: Arc::new(FixtureTransformer),
            }],
        });
        let registry = Arc::new(registry);

        let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(FixtureEmbeddingProvider::new(
            config.embedding_default_model().clone(),
            *config.embedding_default_dimensions() as usize,
        ));
        let vector_store: Arc<dyn VectorStore> = Arc::new(FixtureVectorStore::new());

        let cancellation = Arc::new(CancellationRegistry::new());
        let publisher = Arc::new(Publisher::new(config.redis_url())?);

        Ok(App { config, db_pools, bus, registry, embedding_provider, vector_store, cancellation, publisher })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.db_pools.clone(),
            self.bus.clone(),
            self.registry.clone(),
            self.cancellation.clone(),
            self.publisher.clone(),
            self.config.clone(),
        )
    }

    fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.db_pools.clone(),
            self.bus.clone(),
            self.registry.clone(),
            self.embedding_provider.clone(),
            self.vector_store.clone(),
            self.cancellation.clone(),
            self.publisher.clone(),
            self.config.clone(),
        )
    }
}

fn generate_completions(matches: &ArgMatches) -> Result<()> {
    let shell = matches.value_of("shell").unwrap_or("bash");
    let shell = match shell {
        "bash" => Shell::Bash,
        "elvish" => Shell::Elvish,
        "fish" => Shell::Fish,
        "zsh" => Shell::Zsh,
        other => return Err(anyhow!("Unsupported shell: {}", other)),
    };

    let mut cli = cli::cli();
    let name = crate_name!().to_string();
    clap_complete::generate(shell, &mut cli, name, &mut io::stdout());
    Ok(())
}

fn parse_tenant(matches: &ArgMatches) -> Result<TenantId> {
    matches
        .value_of("tenant_id")
        .ok_or_else(|| anyhow!("missing TENANT_ID"))?
        .parse::<i32>()
        .map(TenantId)
        .map_err(|e| anyhow!("TENANT_ID must be an integer: {}", e))
}

async fn run_job(app: &App, matches: &ArgMatches) -> Result<()> {
    let tenant = parse_tenant(matches)?;
    let job_name = matches.value_of("job_name").ok_or_else(|| anyhow!("missing JOB_NAME"))?;

    let schedule = {
        let conn = app.db_pools.rw().get()?;
        JobSchedule::find_by_name(&conn, tenant, job_name)?
    };

    let scheduler = app.scheduler();
    if scheduler.run_now(tenant, schedule.id).await? {
        println!("started job {} ({}) for tenant {}", job_name, schedule.id, tenant.0);
    } else {
        println!("job {} ({}) for tenant {} is already running; not started", job_name, schedule.id, tenant.0);
    }
    Ok(())
}

fn cancel_job(app: &App, matches: &ArgMatches) -> Result<()> {
    let tenant = parse_tenant(matches)?;
    let job_name = matches.value_of("job_name").ok_or_else(|| anyhow!("missing JOB_NAME"))?;

    let schedule = {
        let conn = app.db_pools.rw().get()?;
        JobSchedule::find_by_name(&conn, tenant, job_name)?
    };

    if app.cancellation.request_cancel(tenant, schedule.id) {
        println!("requested cancellation for job {} ({}) for tenant {}", job_name, schedule.id, tenant.0);
    } else {
        println!("job {} ({}) for tenant {} is not currently running; nothing to cancel", job_name, schedule.id, tenant.0);
    }
    Ok(())
}

fn print_status(app: &App, matches: &ArgMatches) -> Result<()> {
    let tenant = parse_tenant(matches)?;
    let job_name = matches.value_of("job_name").ok_or_else(|| anyhow!("missing JOB_NAME"))?;

    let schedule = {
        let conn = app.db_pools.rw().get()?;
        JobSchedule::find_by_name(&conn, tenant, job_name)?
    };
    let document = schedule.status_document()?;

    println!("{} {} ({})", "overall:".bold(), format!("{:?}", document.overall).to_lowercase(), job_name);

    let mut table = ascii_table::AsciiTable::default();
    table.column(0).set_header("step");
    table.column(1).set_header("extraction");
    table.column(2).set_header("transform");
    table.column(3).set_header("embedding");

    let rows: Vec<Vec<String>> = document
        .step_in_order()
        .into_iter()
        .map(|(_, step)| {
            vec![
                step.display_name.clone(),
                format!("{:?}", step.extraction).to_lowercase(),
                format!("{:?}", step.transform).to_lowercase(),
                format!("{:?}", step.embedding).to_lowercase(),
            ]
        })
        .collect();

    table.print(rows);
    Ok(())
}

async fn requeue_pending_raw(app: &App, matches: &ArgMatches, progressbars: &ProgressBars) -> Result<()> {
    let tenant = parse_tenant(matches)?;
    let limit = matches.value_of("limit").map(str::parse::<i64>).transpose()?;

    let pending = {
        let conn = app.db_pools.rw().get()?;
        RawExtractionRecord::pending_for_tenant(&conn, tenant, limit)?
    };

    let queue = QueueName::Transform(tenant);
    app.bus.declare_queue(&queue).await?;

    let bar = progressbars.bar();
    bar.set_length(pending.len() as u64);
    for record in &pending {
        let envelope = Envelope::new(tenant, record.job_id, record.integration_id, "transform_raw_record", serde_json::json!({ "raw_record_id": record.id }));
        app.bus.publish(&queue, &envelope).await?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("republished {} pending raw record(s) for tenant {}", pending.len(), tenant.0);
    Ok(())
}

async fn worker(app: &App, matches: &ArgMatches, progressbars: &ProgressBars) -> Result<()> {
    match matches.subcommand() {
        // Runs in the foreground: the worker pool's state (its consumer groups and
        // their poll loops) lives only in this process's memory, so starting it has to
        // block until interrupted rather than hand off to a process that then exits.
        Some(("start", matches)) => {
            let pool = app.worker_pool();
            if matches.is_present("all") {
                pool.start_all().await?;
                println!("started workers for every active tenant");
            } else {
                let tenant = parse_tenant(matches)?;
                pool.start_tenant_workers(tenant).await?;
                println!("started workers for tenant {}", tenant.0);
            }

            let spinner = progressbars.spinner();
            spinner.set_message("workers running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.ok();
            spinner.finish_with_message("received interrupt, shutting down worker pool");
            info!("received interrupt, shutting down worker pool");
            pool.stop_all().await?;
            pool.join().await;
        }
        Some(("stop", matches)) => {
            let pool = app.worker_pool();
            if matches.is_present("all") {
                pool.stop_all().await?;
                pool.join().await;
                println!("stopped workers for every active tenant");
            } else {
                let tenant = parse_tenant(matches)?;
                pool.stop_tenant_workers(tenant).await?;
                println!("stopped workers for tenant {}", tenant.0);
            }
        }
        Some(("status", _)) => {
            let pool = app.worker_pool();
            let statuses = pool.status();
            if statuses.is_empty() {
                println!("no worker groups running in this process");
                return Ok(());
            }

            let mut table = ascii_table::AsciiTable::default();
            table.column(0).set_header("queue");
            table.column(1).set_header("running");
            table.column(2).set_header("desired");
            table.column(3).set_header("active");
            table.column(4).set_header("last heartbeat");

            let rows: Vec<Vec<String>> = statuses
                .iter()
                .sorted_by_key(|status| status.queue.as_string())
                .map(|status| {
                    let heartbeat = status
                        .last_heartbeat
                        .map(|at| {
                            let age = chrono::Utc::now().naive_utc().signed_duration_since(at).to_std().unwrap_or_default();
                            format!("{} ago", humantime::format_duration(age))
                        })
                        .unwrap_or_else(|| "never".to_string());

                    vec![
                        status.queue.as_string(),
                        if status.running { "yes".green().to_string() } else { "no".red().to_string() },
                        status.desired_workers.to_string(),
                        status.active_workers.to_string(),
                        heartbeat,
                    ]
                })
                .collect();

            table.print(rows);
        }
        Some((other, _)) => return Err(anyhow!("Unknown worker subcommand: {}", other)),
        None => return Err(anyhow!("No worker subcommand")),
    }
    Ok(())
}

async fn scheduler(app: &App, matches: &ArgMatches, progressbars: &ProgressBars) -> Result<()> {
    match matches.subcommand() {
        Some(("run", _)) => {
            let scheduler = app.scheduler();
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let spinner = progressbars.spinner();
            spinner.set_message("scheduler running, press ctrl-c to stop");

            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("received interrupt, shutting down scheduler");
                let _ = shutdown_tx.send(true);
            });

            let result = scheduler.run(shutdown_rx).await;
            spinner.finish_with_message("scheduler stopped");
            result
        }
        Some((other, _)) => Err(anyhow!("Unknown scheduler subcommand: {}", other)),
        None => Err(anyhow!("No scheduler subcommand")),
    }
}
