use clap::Parser;
use serial_test::serial;
use slurm_exporter::cli::Cli;
use slurm_exporter::config::Config;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Runs `test_fn` with the path of a temporary config file holding `toml_content`.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    test_fn(file.path().to_path_buf());
}

fn parse_cli(args: &[&str]) -> Cli {
    let mut argv = vec!["slurm-exporter"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

/// Points `--config` at a file that does not exist, so only defaults,
/// environment and flags apply.
fn without_file(args: &[&str]) -> Cli {
    let mut cli = parse_cli(args);
    cli.config = Some(PathBuf::from("/nonexistent/slurm-exporter.toml"));
    cli
}

#[test]
#[serial]
fn test_defaults_without_any_source() {
    let config = Config::load(&without_file(&[])).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.poll_limit, 10.0);
    assert_eq!(config.server.listen_address, "0.0.0.0:9092");
    assert_eq!(config.server.metrics_path, "/metrics");
    assert!(!config.collectors.gpus_enabled);
    assert!(!config.collectors.fallback);
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"
        poll_limit = 2.5
        system_metrics_enabled = false
        [server]
        listen_address = "127.0.0.1:9341"
        metrics_path = "/slurm"
        exclude_filter = "^slurm_gpus_idle$"
        [collectors]
        gpus_enabled = true
        fallback = true
        [commands]
        sinfo_gpu = "/opt/slurm/bin/sinfo -h -N -O NodeHost:30|,Gres:60|"
        sacct_gpu = "/opt/slurm/bin/sacct -a -X --format=AllocGRES --state=RUNNING --noheader --parsable2"
        timeout_seconds = 5
    "#;

    with_config_file(toml_content, |path| {
        let cli = parse_cli(&["--config", path.to_str().unwrap()]);
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.poll_limit, 2.5);
        assert!(!config.system_metrics_enabled);
        assert_eq!(config.listen_address().unwrap().port(), 9341);
        assert_eq!(config.server.metrics_path, "/slurm");
        assert!(config.exclude_filter().unwrap().unwrap().is_match("slurm_gpus_idle"));
        assert!(config.collectors.gpus_enabled);
        assert!(config.collectors.fallback);
        assert_eq!(
            config.commands.sinfo_gpu_args(true)[0],
            "/opt/slurm/bin/sinfo"
        );
        assert_eq!(
            config.commands.sacct_gpu_args(true).last().unwrap(),
            "--parsable2"
        );
        assert_eq!(config.commands.timeout_seconds, 5);
    });
}

#[test]
#[serial]
fn test_load_partial_config_uses_defaults() {
    with_config_file("[collectors]\ngpus_enabled = true\n", |path| {
        let cli = parse_cli(&["--config", path.to_str().unwrap()]);
        let config = Config::load(&cli).unwrap();

        assert!(config.collectors.gpus_enabled);
        assert!(!config.collectors.fallback);
        assert_eq!(config.poll_limit, 10.0);
        assert_eq!(config.commands.sinfo_gpu_args(false), ["sinfo", "--json"]);
    });
}

#[test]
#[serial]
fn test_bare_environment_variables() {
    std::env::set_var("POLL_LIMIT", "3");
    std::env::set_var("LOGLEVEL", "warn");
    let result = Config::load(&without_file(&[]));
    std::env::remove_var("POLL_LIMIT");
    std::env::remove_var("LOGLEVEL");

    let config = result.unwrap();
    assert_eq!(config.poll_limit, 3.0);
    assert_eq!(config.log_level, "warn");
}

#[test]
#[serial]
fn test_prefixed_environment_overrides_file() {
    with_config_file("poll_limit = 20\n[collectors]\nfallback = false\n", |path| {
        std::env::set_var("SLURM_EXPORTER_POLL_LIMIT", "7");
        std::env::set_var("SLURM_EXPORTER_COLLECTORS__FALLBACK", "true");
        std::env::set_var("SLURM_EXPORTER_SERVER__METRICS_PATH", "/scrape");
        let result = Config::load(&parse_cli(&["--config", path.to_str().unwrap()]));
        std::env::remove_var("SLURM_EXPORTER_POLL_LIMIT");
        std::env::remove_var("SLURM_EXPORTER_COLLECTORS__FALLBACK");
        std::env::remove_var("SLURM_EXPORTER_SERVER__METRICS_PATH");

        let config = result.unwrap();
        assert_eq!(config.poll_limit, 7.0);
        assert!(config.collectors.fallback);
        assert_eq!(config.server.metrics_path, "/scrape");
    });
}

#[test]
#[serial]
fn test_cli_overrides_everything() {
    with_config_file("poll_limit = 20\nlog_level = \"debug\"\n", |path| {
        std::env::set_var("POLL_LIMIT", "3");
        let cli = parse_cli(&[
            "--config",
            path.to_str().unwrap(),
            "--poll-limit",
            "1.5",
            "--log-level",
            "trace",
            "--listen-address",
            "127.0.0.1:9999",
            "--metrics-exclude-filter",
            "utilization",
            "--gpus-enabled",
            "--fallback",
            "--sinfo-gpu-override",
            "cat /tmp/sinfo.txt",
            "--command-timeout",
            "2",
        ]);
        let result = Config::load(&cli);
        std::env::remove_var("POLL_LIMIT");

        let config = result.unwrap();
        assert_eq!(config.poll_limit, 1.5);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.server.listen_address, "127.0.0.1:9999");
        assert_eq!(config.server.exclude_filter.as_deref(), Some("utilization"));
        assert!(config.collectors.gpus_enabled);
        assert!(config.collectors.fallback);
        assert_eq!(config.commands.sinfo_gpu_args(true), ["cat", "/tmp/sinfo.txt"]);
        assert_eq!(config.commands.sacct_gpu_args(true)[0], "sacct");
        assert_eq!(config.commands.timeout_seconds, 2);
    });
}

#[test]
#[serial]
fn test_absent_switches_keep_file_values() {
    with_config_file("[collectors]\ngpus_enabled = true\nfallback = true\n", |path| {
        let config = Config::load(&parse_cli(&["--config", path.to_str().unwrap()])).unwrap();
        assert!(config.collectors.gpus_enabled);
        assert!(config.collectors.fallback);
    });
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    for toml_content in [
        "poll_limit = -1\n",
        "poll_limit = \"soon\"\n",
        "[server]\nlisten_address = \"not-an-address\"\n",
        "[server]\nmetrics_path = \"metrics\"\n",
        "[server]\nexclude_filter = \"([\"\n",
        "[commands]\ntimeout_seconds = -5\n",
    ] {
        with_config_file(toml_content, |path| {
            let cli = parse_cli(&["--config", path.to_str().unwrap()]);
            assert!(Config::load(&cli).is_err(), "accepted: {toml_content}");
        });
    }
}

#[test]
#[serial]
fn test_invalid_toml_is_an_error() {
    with_config_file("poll_limit = = 3\n", |path| {
        let cli = parse_cli(&["--config", path.to_str().unwrap()]);
        assert!(Config::load(&cli).is_err());
    });
}
