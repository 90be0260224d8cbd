// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::time::Duration;

use clap::Parser;

use super::{Cli, Command};

const AUTHORITY_URI: &str = "https://auth.example.com";

#[test]
fn host_defaults() -> anyhow::Result<()> {
    let cli = Cli::try_parse_from([
        "switchboard",
        "host",
        "--authority-uri",
        AUTHORITY_URI,
        "--host-id",
        "h1",
        "--host-secret",
        "s3cret",
    ])?;
    let Command::Host(args) = cli.command else {
        anyhow::bail!("expected host command");
    };
    let config = args.to_config();
    assert_eq!(config.host_id, "h1");
    assert_eq!(config.host_name, None);
    assert_eq!(config.retry_delay, Duration::from_secs(10));
    assert_eq!(config.discovery.max_backoff, Duration::from_secs(16));
    assert_eq!(config.discovery.broker_uri, None);
    Ok(())
}

#[test]
fn authority_with_overrides() -> anyhow::Result<()> {
    let cli = Cli::try_parse_from([
        "switchboard",
        "authority",
        "--authority-uri",
        AUTHORITY_URI,
        "--authority-uri-internal",
        "http://authority:8080",
        "--broker-uri",
        "nats://broker:4222",
        "--max-backoff-secs",
        "4",
        "--access-token",
        "tok",
        "--records",
        "/etc/switchboard/records.json",
        "--log-format",
        "json",
    ])?;
    assert_eq!(cli.log_format, "json");
    let Command::Authority(args) = cli.command else {
        anyhow::bail!("expected authority command");
    };
    assert_eq!(args.access_token, "tok");
    assert_eq!(args.records.as_deref(), Some(Path::new("/etc/switchboard/records.json")));
    let config = args.discovery.to_config();
    assert_eq!(config.authority_uri_internal.as_deref(), Some("http://authority:8080"));
    assert_eq!(config.broker_uri.as_deref(), Some("nats://broker:4222"));
    assert_eq!(config.max_backoff, Duration::from_secs(4));
    Ok(())
}

#[test]
fn zero_backoff_clamped() -> anyhow::Result<()> {
    let cli = Cli::try_parse_from([
        "switchboard",
        "authority",
        "--authority-uri",
        AUTHORITY_URI,
        "--access-token",
        "tok",
        "--max-backoff-secs",
        "0",
    ])?;
    let Command::Authority(args) = cli.command else {
        anyhow::bail!("expected authority command");
    };
    assert_eq!(args.discovery.max_backoff(), Duration::from_secs(1));
    Ok(())
}

#[yare::parameterized(
    no_role = { &["switchboard"] },
    host_without_secret = { &["switchboard", "host", "--authority-uri", AUTHORITY_URI, "--host-id", "h1"] },
    authority_without_uri = { &["switchboard", "authority", "--access-token", "tok"] },
)]
fn missing_required(args: &[&str]) {
    assert!(Cli::try_parse_from(args).is_err());
}
