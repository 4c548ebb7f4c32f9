//! # feedlink
//!
//! Connects to a live-feed backend, subscribes to one feed, and prints
//! every delivery as a JSON line until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use feedlink_client::LiveClient;
use feedlink_core::{FeedName, Identity};
use feedlink_settings::{LinkSettings, load_settings_from_path, settings_path};

/// Live feed client.
#[derive(Parser, Debug)]
#[command(name = "feedlink", about = "Subscribe to live feeds from the terminal")]
struct Cli {
    /// Settings file (defaults to `~/.feedlink/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log as JSON lines instead of compact text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print deliveries of one feed as JSON lines.
    Tail(TailArgs),
}

#[derive(clap::Args, Debug)]
struct TailArgs {
    /// Feed name, e.g. `onServerStatusUpdate`.
    feed: String,

    /// Base WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token.
    #[arg(long, default_value = "")]
    token: String,

    /// Scope appended to the URL, e.g. a workspace id.
    #[arg(long)]
    scope: String,

    /// Print the running latest value instead of every delivery.
    #[arg(long)]
    latest: bool,

    /// Only print payloads whose top-level KEY equals VALUE.
    #[arg(long = "match", value_name = "KEY=VALUE", value_parser = parse_match)]
    matches: Vec<(String, Value)>,
}

/// Parse `KEY=VALUE`; VALUE is read as JSON when it parses, else as a string.
fn parse_match(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

fn accepts(matches: &[(String, Value)], payload: &Value) -> bool {
    matches
        .iter()
        .all(|(key, expected)| payload.get(key) == Some(expected))
}

fn line(feed: &FeedName, payload: &Value) -> String {
    json!({
        "at": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "feed": feed.as_str(),
        "data": payload,
    })
    .to_string()
}

fn load(path: Option<PathBuf>) -> Result<LinkSettings> {
    let path = path.unwrap_or_else(settings_path);
    load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

async fn tail(settings: &LinkSettings, args: TailArgs) -> Result<()> {
    let feed = FeedName::new(args.feed).context("invalid feed name")?;
    let mut settings = settings.clone();
    if let Some(url) = args.url {
        settings.server.url = url;
    }

    let client = LiveClient::from_settings(&settings);
    let session = client.open(Identity::new(args.token, args.scope));
    tokio::select! {
        opened = session.wait_open() => opened.context("connection closed before opening")?,
        _ = tokio::signal::ctrl_c() => return Ok(()),
    }
    tracing::info!(feed = %feed, "connected");

    if args.latest {
        let latest = client.latest_value(feed.clone(), Value::Null)?;
        let mut rx = latest.watch();
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        bail!("feed ended");
                    }
                    let value = rx.borrow_and_update().clone();
                    if accepts(&args.matches, &value) {
                        println!("{}", line(&feed, &value));
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    } else {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let matches = args.matches;
        let _subscription = client.subscribe(feed.clone(), move |payload| {
            if accepts(&matches, &payload) {
                let _ = tx.send(payload);
            }
        })?;
        loop {
            tokio::select! {
                payload = rx.recv() => match payload {
                    Some(payload) => println!("{}", line(&feed, &payload)),
                    None => bail!("feed ended"),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.settings)?;
    if cli.log_json {
        feedlink_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        feedlink_core::logging::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Tail(args) => tail(&settings, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_match_reads_json_values() {
        assert_eq!(
            parse_match("status=1").unwrap(),
            ("status".to_string(), json!(1))
        );
        assert_eq!(
            parse_match("up=true").unwrap(),
            ("up".to_string(), json!(true))
        );
    }

    #[test]
    fn parse_match_falls_back_to_string() {
        assert_eq!(
            parse_match("monitorId=abc").unwrap(),
            ("monitorId".to_string(), json!("abc"))
        );
        assert_eq!(
            parse_match("name=a=b").unwrap(),
            ("name".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn parse_match_rejects_malformed() {
        assert!(parse_match("novalue").is_err());
        assert!(parse_match("=1").is_err());
    }

    #[test]
    fn accepts_requires_every_match() {
        let payload = json!({"monitorId": "m1", "value": 120});
        assert!(accepts(&[], &payload));
        assert!(accepts(&[("monitorId".into(), json!("m1"))], &payload));
        assert!(!accepts(
            &[("monitorId".into(), json!("m1")), ("value".into(), json!(5))],
            &payload
        ));
        assert!(!accepts(&[("missing".into(), json!(1))], &Value::Null));
    }

    #[test]
    fn cli_parses_tail() {
        let cli = Cli::parse_from([
            "feedlink",
            "tail",
            "onMonitorReceiveNewData",
            "--scope",
            "ws_1",
            "--token",
            "tok",
            "--match",
            "monitorId=m1",
            "--latest",
        ]);
        assert!(!cli.log_json);
        let Command::Tail(args) = cli.command;
        assert_eq!(args.feed, "onMonitorReceiveNewData");
        assert!(args.latest);
        assert_eq!(args.matches.len(), 1);
        assert!(args.url.is_none());
    }

    #[test]
    fn log_json_is_global() {
        let cli = Cli::parse_from(["feedlink", "tail", "feed", "--scope", "ws_1", "--log-json"]);
        assert!(cli.log_json);
    }

    #[test]
    fn line_is_json() {
        let feed = FeedName::new("feed").unwrap();
        let v: Value = serde_json::from_str(&line(&feed, &json!({"n": 1}))).unwrap();
        assert_eq!(v["feed"], "feed");
        assert_eq!(v["data"]["n"], 1);
        assert!(v["at"].as_str().is_some());
    }
}
