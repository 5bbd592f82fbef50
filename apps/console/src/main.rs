use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use auth::{AuthMode, CredentialProvider, MissingTokenAcquirer, ProxyTokenAcquirer, TokenAcquirer};
use cascade_core::{CascadeConfig, CascadeController, CascadeEvent, CascadeSnapshot};
use shared::{domain::RecordId, protocol::Record};
use webapi::CollectionFetcher;

mod settings;

use settings::{load_settings, Settings};

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; a missing file falls back to built-in defaults.
    #[arg(long, default_value = "picker.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings(&args.config);

    let controller = build_controller(&settings)?;

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CascadeEvent::SelectionChanged(change) => {
                    println!(
                        "selection-changed: parent='{}' child='{}'",
                        change.selected_parent_name, change.selected_child_name
                    );
                }
                CascadeEvent::StateChanged(snapshot) => {
                    println!(
                        "state: {:?} parents={} children={}",
                        snapshot.phase,
                        snapshot.parents.len(),
                        snapshot.children.len()
                    );
                    if let Some(err) = &snapshot.parent_error {
                        println!("parent error: {err}");
                    }
                    if let Some(err) = &snapshot.child_error {
                        println!("child error: {err}");
                    }
                }
            }
        }
    });

    controller.initialize().await;

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("parents") => print_collection(&controller.snapshot().await.parents),
            Some("children") => print_collection(&controller.snapshot().await.children),
            Some("parent") => {
                let snapshot = controller.snapshot().await;
                match pick(parts.next(), &snapshot.parents) {
                    Pick::Clear => controller.select_parent(RecordId::empty(), "").await,
                    Pick::Record(record) => {
                        controller
                            .select_parent(record.id.clone(), record.display_name.clone())
                            .await
                    }
                    Pick::Invalid => println!("usage: parent <index|->"),
                }
            }
            Some("child") => {
                let snapshot = controller.snapshot().await;
                match pick(parts.next(), &snapshot.children) {
                    Pick::Clear => controller.select_child(RecordId::empty(), "").await,
                    Pick::Record(record) => {
                        controller
                            .select_child(record.id.clone(), record.display_name.clone())
                            .await
                    }
                    Pick::Invalid => println!("usage: child <index|->"),
                }
            }
            Some("show") => print_snapshot(&controller.snapshot().await),
            Some("reload") => controller.initialize().await,
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command '{other}'"),
            None => {}
        }
    }

    Ok(())
}

fn build_controller(settings: &Settings) -> Result<Arc<CascadeController>> {
    let base = Url::parse(&settings.base_url).context("invalid base_url")?;

    let acquirer: Arc<dyn TokenAcquirer> = match settings.auth_mode {
        AuthMode::Proxy => {
            let endpoint = settings
                .token_endpoint
                .as_deref()
                .context("auth_mode = \"proxy\" requires token_endpoint")?;
            let endpoint = Url::parse(endpoint).context("invalid token_endpoint")?;
            let mut acquirer = ProxyTokenAcquirer::new(endpoint);
            if let Some(ms) = settings.request_timeout_ms {
                acquirer = acquirer.with_timeout(Duration::from_millis(ms));
            }
            Arc::new(acquirer)
        }
        AuthMode::Interactive => {
            // No interactive flow ships with the console; sign-in fails soft
            // until the host wires one in.
            Arc::new(MissingTokenAcquirer)
        }
    };

    let mut fetcher = CollectionFetcher::new(base);
    if let Some(ms) = settings.request_timeout_ms {
        fetcher = fetcher.with_timeout(Duration::from_millis(ms));
    }

    Ok(CascadeController::new(
        CredentialProvider::new(acquirer),
        Arc::new(fetcher),
        CascadeConfig {
            parent_entity: settings.parent_entity.clone(),
            child_entity: settings.child_entity.clone(),
            filter_field: settings.filter_field.clone(),
        },
    ))
}

enum Pick<'a> {
    Clear,
    Record(&'a Record),
    Invalid,
}

fn pick<'a>(arg: Option<&str>, records: &'a [Record]) -> Pick<'a> {
    match arg {
        Some("-") => Pick::Clear,
        Some(raw) => match raw.parse::<usize>() {
            Ok(index) if index >= 1 && index <= records.len() => Pick::Record(&records[index - 1]),
            _ => Pick::Invalid,
        },
        None => Pick::Invalid,
    }
}

fn print_help() {
    println!("commands: parents | children | parent <n|-> | child <n|-> | show | reload | quit");
}

fn print_collection(records: &[Record]) {
    if records.is_empty() {
        println!("(empty)");
        return;
    }
    for (index, record) in records.iter().enumerate() {
        match &record.region {
            Some(region) => println!("{:>3}. {} [{}]", index + 1, record.display_name, region),
            None => println!("{:>3}. {}", index + 1, record.display_name),
        }
    }
}

fn print_snapshot(snapshot: &CascadeSnapshot) {
    println!("phase: {:?}", snapshot.phase);
    println!(
        "parent: '{}' child: '{}'",
        snapshot.selection.parent_name, snapshot.selection.child_name
    );
    println!(
        "parents: {} children: {} (child selector {})",
        snapshot.parents.len(),
        snapshot.children.len(),
        if snapshot.child_selector_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(err) = &snapshot.parent_error {
        println!("parent error: {err}");
    }
    if let Some(err) = &snapshot.child_error {
        println!("child error: {err}");
    }
}
