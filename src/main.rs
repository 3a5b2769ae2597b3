use std::{path::Path, process, sync::Arc};

use pagerefresh::{
    application::{
        error::AppError,
        generate::{GenerateOptions, GeneratorKind, RegenerationPipeline, RunReport, RunStatus},
        jobs::MemoryJobQueue,
    },
    cache::RefreshConfig,
    config,
    domain::site_uri::{SiteId, SiteUri},
    infra::{error::InfraError, remote::RemoteGenerator, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "pagerefresh::cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(target: SOURCE, error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(target: SOURCE, error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Regenerate(args) => run_regenerate(settings, args).await,
    }
}

async fn run_regenerate(
    settings: config::Settings,
    args: config::RegenerateArgs,
) -> Result<(), AppError> {
    let sites = settings.site_urls()?;
    if sites.base_url(args.site_id).is_none() {
        return Err(AppError::validation(format!(
            "site {} has no base URL; pass --base-url or configure [[sites]]",
            args.site_id
        )));
    }

    let uris = read_site_uris(&args.file, args.site_id).await?;
    let refresh = RefreshConfig::from(&settings.refresh);
    let options = GenerateOptions::from_config(&refresh).with_progress(|count, total, label| {
        info!(target: SOURCE, count, total, "{label}");
    });

    info!(
        target: SOURCE,
        pages = uris.len(),
        site_id = args.site_id,
        concurrency = options.concurrency,
        queue = options.queue,
        "starting regeneration"
    );

    let generator = Arc::new(RemoteGenerator::new(sites, &settings.generator));
    let pipeline = RegenerationPipeline::new().with_generator(generator);

    if !options.queue {
        let status = pipeline.run(uris, GeneratorKind::Remote, options).await;
        return finish(status);
    }

    let queue = MemoryJobQueue::new();
    let pipeline = pipeline.with_queue(Arc::new(queue.clone()));
    let worker = pipeline.spawn_worker(&queue);

    let status = pipeline.run(uris, GeneratorKind::Remote, options).await;
    let summary = worker.drain().await;
    info!(
        target: SOURCE,
        completed = summary.completed,
        failed = summary.failed,
        "job worker drained"
    );

    match status {
        RunStatus::Queued(_) if summary.failed > 0 => Err(AppError::unexpected(format!(
            "{} regeneration job(s) failed",
            summary.failed
        ))),
        RunStatus::Queued(_) => Ok(()),
        other => finish(other),
    }
}

fn finish(status: RunStatus) -> Result<(), AppError> {
    match status {
        RunStatus::Completed(report) => report_outcome(&report),
        RunStatus::Queued(job_id) => {
            info!(target: SOURCE, %job_id, "regeneration queued");
            Ok(())
        }
        RunStatus::Aborted => {
            warn!(target: SOURCE, "regeneration aborted");
            Ok(())
        }
        RunStatus::Empty => {
            info!(target: SOURCE, "no pages to regenerate");
            Ok(())
        }
    }
}

fn report_outcome(report: &RunReport) -> Result<(), AppError> {
    if let Some(message) = &report.batch_error {
        return Err(AppError::unexpected(format!(
            "regeneration could not start: {message}"
        )));
    }

    info!(
        target: SOURCE,
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "regeneration finished"
    );

    if report.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} of {} pages failed to regenerate",
            report.failed, report.attempted
        )));
    }
    Ok(())
}

async fn read_site_uris(path: &Path, site_id: SiteId) -> Result<Vec<SiteUri>, AppError> {
    let contents = if path == Path::new("-") {
        tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
            .await
            .map_err(|err| AppError::unexpected(format!("stdin reader stopped: {err}")))?
    } else {
        tokio::fs::read_to_string(path).await
    }
    .map_err(InfraError::from)?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| SiteUri::new(site_id, line))
        .collect())
}
