use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pagerefresh::application::generate::{
    GenerateError, GenerateOptions, GenerationOutcome, GeneratorKind, PageGenerator,
    RegenerationPipeline, RunStatus,
};
use pagerefresh::domain::site_uri::SiteUri;

/// Generator that records concurrency and fails one path.
struct SlowGenerator {
    kind: GeneratorKind,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    visits: Mutex<HashMap<String, usize>>,
}

impl SlowGenerator {
    fn new(kind: GeneratorKind) -> Self {
        Self {
            kind,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            visits: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PageGenerator for SlowGenerator {
    fn kind(&self) -> GeneratorKind {
        self.kind
    }

    async fn generate(&self, uri: &SiteUri) -> Result<GenerationOutcome, GenerateError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self
            .visits
            .lock()
            .unwrap()
            .entry(uri.uri().to_string())
            .or_default() += 1;

        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if uri.uri() == "page-7" {
            return Err(GenerateError::status(
                format!("https://example.com/{}", uri.uri()),
                404,
                "Not Found",
            ));
        }
        Ok(GenerationOutcome::generated(uri, Some(200)))
    }
}

fn uris(count: usize) -> Vec<SiteUri> {
    (0..count)
        .map(|index| SiteUri::new(1, format!("page-{index}")))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_run_respects_limit_and_counts_failures() {
    let generator = Arc::new(SlowGenerator::new(GeneratorKind::Remote));
    let pipeline = RegenerationPipeline::new().with_generator(generator.clone());

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);
    let options = GenerateOptions {
        concurrency: 3,
        ..Default::default()
    }
    .with_progress(move |count, total, label| {
        seen.lock().unwrap().push((count, total, label.to_string()));
    });

    let status = pipeline.run(uris(10), GeneratorKind::Remote, options).await;
    let RunStatus::Completed(report) = status else {
        panic!("expected an inline run, got {status:?}");
    };

    assert_eq!(report.attempted, 10);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 1);
    assert!(report.batch_error.is_none());

    let failed: Vec<_> = report
        .outcomes
        .iter()
        .filter(|outcome| !outcome.status.is_success())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].uri.uri(), "page-7");
    assert_eq!(failed[0].http_status, Some(404));

    let max = generator.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {max} pages in flight");
    assert!(max >= 2, "run did not overlap requests");

    let visits = generator.visits.lock().unwrap();
    assert_eq!(visits.len(), 10);
    assert!(visits.values().all(|count| *count == 1));

    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), 10);
    let counts: Vec<usize> = progress.iter().map(|(count, _, _)| *count).collect();
    assert_eq!(counts, (1..=10).collect::<Vec<_>>());
    assert_eq!(progress[9].2, "Generating 10 of 10 pages.");
}

#[tokio::test]
async fn concurrency_of_one_runs_pages_one_at_a_time() {
    let generator = Arc::new(SlowGenerator::new(GeneratorKind::Remote));
    let pipeline = RegenerationPipeline::new().with_generator(generator.clone());

    let options = GenerateOptions {
        concurrency: 1,
        ..Default::default()
    };
    let status = pipeline.run(uris(4), GeneratorKind::Remote, options).await;

    assert!(matches!(status, RunStatus::Completed(ref report) if report.attempted == 4));
    assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_generation_ignores_requested_concurrency() {
    let generator = Arc::new(SlowGenerator::new(GeneratorKind::Local));
    let pipeline = RegenerationPipeline::new().with_generator(generator.clone());

    let options = GenerateOptions {
        concurrency: 5,
        ..Default::default()
    };
    let status = pipeline.run(uris(6), GeneratorKind::Local, options).await;

    let RunStatus::Completed(report) = status else {
        panic!("expected an inline run, got {status:?}");
    };
    assert_eq!(report.attempted, 6);
    assert_eq!(report.succeeded, 6);
    assert_eq!(generator.visits.lock().unwrap().len(), 6);
    assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_list_does_not_touch_the_generator() {
    let generator = Arc::new(SlowGenerator::new(GeneratorKind::Remote));
    let pipeline = RegenerationPipeline::new().with_generator(generator.clone());

    let status = pipeline
        .run(Vec::new(), GeneratorKind::Remote, GenerateOptions::default())
        .await;

    assert_eq!(status, RunStatus::Empty);
    assert!(generator.visits.lock().unwrap().is_empty());
}
