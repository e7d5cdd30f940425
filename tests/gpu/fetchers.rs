#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::{GpuHarness, Mode};
use slurm_exporter::fetcher::{FetchError, MetricFetcher};
use slurm_exporter::scraper::test_utils::{fixture_path, MockScraper};
use std::sync::Arc;
use std::time::Duration;

const SINFO_JSON_4_GPUS: &str = r#"{"errors": [], "nodes": [{"name": "n1", "gres": "gpu:4"}]}"#;
const SACCT_JSON_1_GPU: &str = r#"{"errors": [], "jobs": [{"allocated_gres": "gres/gpu=1"}]}"#;

fn minimal_harness(mode: Mode, poll_limit: f64) -> GpuHarness {
    let (sinfo, sacct) = match mode {
        Mode::Json => (SINFO_JSON_4_GPUS, SACCT_JSON_1_GPU),
        Mode::Fallback => ("n1|gpu:4|\n", "gpu:1\n"),
    };
    GpuHarness::new(
        mode,
        MockScraper::from_bytes(sinfo),
        MockScraper::from_bytes(sacct),
        poll_limit,
    )
}

#[tokio::test]
async fn both_variants_agree_on_fixtures() {
    for mode in Mode::ALL {
        let harness = GpuHarness::from_fixtures(mode, 10.0);
        let metrics = harness.fetcher.fetch_metrics().await.unwrap();

        assert_eq!(metrics.total, 20.0, "{mode:?}");
        assert_eq!(metrics.alloc, 7.0, "{mode:?}");
        assert_eq!(metrics.idle, 13.0, "{mode:?}");
        assert_eq!(metrics.utilization, 0.35, "{mode:?}");
        assert_eq!(harness.fetcher.scrape_error().get(), 0, "{mode:?}");
        assert_eq!(harness.fetcher.scrape_duration(), Duration::ZERO, "{mode:?}");
    }
}

#[tokio::test]
async fn repeated_fetches_within_ttl_reuse_the_snapshot() {
    for mode in Mode::ALL {
        let harness = GpuHarness::from_fixtures(mode, 10.0);
        let first = harness.fetcher.fetch_metrics().await.unwrap();
        let second = harness.fetcher.fetch_metrics().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second), "{mode:?}");
        assert_eq!(harness.sinfo.calls(), 1, "{mode:?}");
        assert_eq!(harness.sacct.calls(), 1, "{mode:?}");
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    for mode in Mode::ALL {
        let (sinfo, sacct) = mode.fixtures();
        let harness = GpuHarness::new(
            mode,
            MockScraper::from_fixture(fixture_path(sinfo))
                .with_delay(Duration::from_millis(50)),
            MockScraper::from_fixture(fixture_path(sacct)),
            10.0,
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let fetcher = Arc::clone(&harness.fetcher);
                tokio::spawn(async move { fetcher.fetch_metrics().await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let metrics = task.unwrap().unwrap();
            assert_eq!(metrics.total, 20.0, "{mode:?}");
        }
        assert_eq!(harness.sinfo.calls(), 1, "{mode:?}");
        assert_eq!(harness.sacct.calls(), 1, "{mode:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn snapshot_refreshes_after_ttl() {
    for mode in Mode::ALL {
        let harness = minimal_harness(mode, 1.0);
        assert_eq!(harness.fetcher.fetch_metrics().await.unwrap().total, 4.0);

        match mode {
            Mode::Json => harness
                .sinfo
                .set_bytes(r#"{"nodes": [{"name": "n1", "gres": "gpu:8"}]}"#),
            Mode::Fallback => harness.sinfo.set_bytes("n1|gpu:8|\n"),
        }

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(harness.fetcher.fetch_metrics().await.unwrap().total, 4.0, "{mode:?}");
        assert_eq!(harness.sinfo.calls(), 1, "{mode:?}");

        tokio::time::advance(Duration::from_millis(600)).await;
        let refreshed = harness.fetcher.fetch_metrics().await.unwrap();
        assert_eq!(refreshed.total, 8.0, "{mode:?}");
        assert_eq!(refreshed.utilization, 1.0 / 8.0, "{mode:?}");
        assert_eq!(harness.sinfo.calls(), 2, "{mode:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn callers_after_expiry_share_one_refresh() {
    for mode in Mode::ALL {
        let (sinfo, sacct) = match mode {
            Mode::Json => (SINFO_JSON_4_GPUS, SACCT_JSON_1_GPU),
            Mode::Fallback => ("n1|gpu:4|\n", "gpu:1\n"),
        };
        let harness = GpuHarness::new(
            mode,
            MockScraper::from_bytes(sinfo).with_delay(Duration::from_millis(100)),
            MockScraper::from_bytes(sacct),
            1.0,
        );
        let first = harness.fetcher.fetch_metrics().await.unwrap();
        assert_eq!(first.total, 4.0, "{mode:?}");

        match mode {
            Mode::Json => harness
                .sinfo
                .set_bytes(r#"{"nodes": [{"name": "n1", "gres": "gpu:8"}]}"#),
            Mode::Fallback => harness.sinfo.set_bytes("n1|gpu:8|\n"),
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let fetcher = Arc::clone(&harness.fetcher);
                tokio::spawn(async move { fetcher.fetch_metrics().await })
            })
            .collect();
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|task| task.unwrap().unwrap())
            .collect();

        for metrics in &results {
            assert_eq!(metrics.total, 8.0, "{mode:?}");
            assert!(Arc::ptr_eq(metrics, &results[0]), "{mode:?}");
        }
        assert_eq!(harness.sinfo.calls(), 2, "{mode:?}");
        assert_eq!(harness.sacct.calls(), 2, "{mode:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn sinfo_and_sacct_run_in_sequence() {
    let delay = Duration::from_millis(100);
    for mode in Mode::ALL {
        let (sinfo, sacct) = mode.fixtures();
        let harness = GpuHarness::new(
            mode,
            MockScraper::from_fixture(fixture_path(sinfo)).with_delay(delay),
            MockScraper::from_fixture(fixture_path(sacct)).with_delay(delay),
            10.0,
        );

        let start = tokio::time::Instant::now();
        harness.fetcher.fetch_metrics().await.unwrap();
        assert!(start.elapsed() >= delay * 2, "{mode:?}: {:?}", start.elapsed());
    }
}

#[tokio::test]
async fn failed_sinfo_never_runs_sacct() {
    for mode in Mode::ALL {
        let (_, sacct) = mode.fixtures();
        let harness = GpuHarness::new(
            mode,
            MockScraper::failing("sinfo: error: Unable to contact slurm controller"),
            MockScraper::from_fixture(fixture_path(sacct)),
            10.0,
        );
        assert!(harness.fetcher.fetch_metrics().await.is_err(), "{mode:?}");
        assert_eq!(harness.sinfo.calls(), 1, "{mode:?}");
        assert_eq!(harness.sacct.calls(), 0, "{mode:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_previous_snapshot() {
    for mode in Mode::ALL {
        let harness = minimal_harness(mode, 1.0);
        let first = harness.fetcher.fetch_metrics().await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        harness.sacct.set_failure("sacct: command not found");
        let err = harness.fetcher.fetch_metrics().await.unwrap_err();
        assert!(matches!(err, FetchError::Scrape(_)), "{mode:?}: {err}");

        // The error is not cached: the next call retries.
        assert!(harness.fetcher.fetch_metrics().await.is_err(), "{mode:?}");
        assert_eq!(harness.sacct.calls(), 3, "{mode:?}");

        let sacct = match mode {
            Mode::Json => SACCT_JSON_1_GPU,
            Mode::Fallback => "gpu:1\n",
        };
        harness.sacct.set_bytes(sacct);
        let recovered = harness.fetcher.fetch_metrics().await.unwrap();
        assert_eq!(*recovered, *first, "{mode:?}");
        assert!(!Arc::ptr_eq(&recovered, &first), "{mode:?}");
    }
}

#[tokio::test]
async fn transport_errors_do_not_count_as_scrape_errors() {
    for mode in Mode::ALL {
        let harness = GpuHarness::new(
            mode,
            MockScraper::failing("sinfo: timed out"),
            MockScraper::from_bytes(""),
            10.0,
        );
        assert!(harness.fetcher.fetch_metrics().await.is_err(), "{mode:?}");
        assert_eq!(harness.fetcher.scrape_error().get(), 0, "{mode:?}");
    }
}

#[tokio::test]
async fn upstream_errors_accumulate_across_cycles() {
    let harness = GpuHarness::new(
        Mode::Json,
        MockScraper::from_bytes(r#"{"errors": ["slurm_load_node error"], "nodes": []}"#),
        MockScraper::from_bytes(SACCT_JSON_1_GPU),
        0.0,
    );
    for _ in 0..3 {
        let err = harness.fetcher.fetch_metrics().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "sinfo API error response: slurm_load_node error"
        );
    }
    assert_eq!(harness.fetcher.scrape_error().get(), 3);
}

#[tokio::test]
async fn zero_poll_limit_always_refreshes() {
    for mode in Mode::ALL {
        let harness = minimal_harness(mode, 0.0);
        for _ in 0..3 {
            harness.fetcher.fetch_metrics().await.unwrap();
        }
        assert_eq!(harness.sinfo.calls(), 3, "{mode:?}");
    }
}
