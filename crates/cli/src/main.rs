use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use stitch_core::{ChangeEvent, ChangeKind, DecodePolicy, ResourceItem, ResourceKind, Selector, Termination, WatchConfig};
use stitch_kubehub::{list_snapshot, KubeListerWatcher, Subscriber};
use stitch_store::Cache;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "stitchctl", version, about = "List then watch a Kubernetes collection")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to list and watch
    #[arg(long = "ns", global = true, env = "STITCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Select all namespaces (overrides --ns)
    #[arg(short = 'A', long = "all-namespaces", global = true, action = ArgAction::SetTrue)]
    all_namespaces: bool,

    /// Field selector, e.g. "status.phase=Running,spec.nodeName!=n1"
    #[arg(long = "field-selector", global = true, env = "STITCH_FIELD_SELECTOR")]
    field_selector: Option<String>,

    /// Label selector, passed through to the API server
    #[arg(short = 'l', long = "selector", global = true, env = "STITCH_LABEL_SELECTOR")]
    label_selector: Option<String>,

    /// Resource kind: pod, configmap or service
    #[arg(long = "kind", global = true, env = "STITCH_KIND", default_value = "pod")]
    kind: ResourceKind,

    /// What to do with an event that cannot be decoded: terminate or skip
    #[arg(long = "on-decode-error", global = true, env = "STITCH_DECODE_POLICY", default_value = "terminate")]
    decode_policy: DecodePolicy,

    /// Server-side watch timeout in seconds
    #[arg(long = "watch-timeout", global = true, env = "STITCH_WATCH_TIMEOUT")]
    watch_timeout: Option<u32>,

    /// Do not request bookmark events
    #[arg(long = "no-bookmarks", global = true, action = ArgAction::SetTrue)]
    no_bookmarks: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current snapshot and its resourceVersion
    List,
    /// Print the snapshot, then every change from its resourceVersion until Ctrl-C
    Watch {
        /// Re-subscribe when the server closes the stream; re-list when the version expires
        #[arg(long = "rewatch", action = ArgAction::SetTrue)]
        rewatch: bool,
    },
}

impl Cli {
    fn watch_config(&self) -> Result<WatchConfig> {
        let mut selector = if self.all_namespaces { Selector::all() } else { Selector::namespaced(&self.namespace) };
        selector.field_selector = self.field_selector.clone();
        selector.label_selector = self.label_selector.clone();
        let cfg = WatchConfig {
            selector,
            kind: self.kind,
            decode_policy: self.decode_policy,
            watch_timeout: self.watch_timeout,
            bookmarks: !self.no_bookmarks,
        };
        cfg.validate().context("invalid options")?;
        Ok(cfg)
    }
}

fn init_tracing() {
    let env = std::env::var("STITCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STITCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STITCH_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(serde::Serialize)]
struct Row<'a> {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    event: Option<&'static str>,
    namespace: Option<&'a str>,
    name: &'a str,
    #[serde(rename = "resourceVersion")]
    resource_version: &'a str,
}

impl<'a> Row<'a> {
    fn new(event: Option<ChangeKind>, item: &'a ResourceItem) -> Self {
        Self {
            event: event.map(|k| k.as_str()),
            namespace: item.namespace.as_deref(),
            name: &item.name,
            resource_version: &item.resource_version,
        }
    }
}

fn print_item(output: Output, item: &ResourceItem) {
    match output {
        Output::Human => {
            println!("namespace: {}, resource name: {}", item.namespace.as_deref().unwrap_or("-"), item.name)
        }
        Output::Json => print_json(&Row::new(None, item)),
    }
}

fn print_event(output: Output, ev: &ChangeEvent) {
    match output {
        Output::Human => println!("eventType: {}, watch obj: {}", ev.kind, ev.item.object_ref()),
        Output::Json => print_json(&Row::new(Some(ev.kind), &ev.item)),
    }
}

fn print_json<T: serde::Serialize>(v: &T) {
    match serde_json::to_string(v) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(error = %e, "serializing output row"),
    }
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received; shutting down watch loop");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });
}

/// What the watch loop does after one subscription ends.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Exit,
    Resubscribe,
    Relist,
    Fail,
}

fn next_step(termination: &Termination, rewatch: bool, cancelled: bool) -> Next {
    match termination {
        Termination::Cancelled => Next::Exit,
        _ if cancelled => Next::Exit,
        Termination::StreamClosed if rewatch => Next::Resubscribe,
        Termination::StreamClosed => Next::Exit,
        Termination::Errored(e) if rewatch && e.is_expired() => Next::Relist,
        Termination::Errored(_) => Next::Fail,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = cli.watch_config()?;
    let output = cli.output;

    let lw = KubeListerWatcher::try_default(cfg.kind)
        .await
        .context("building kube client")?
        .with_watch_timeout(cfg.watch_timeout)
        .with_bookmarks(cfg.bookmarks);

    match cli.command {
        Commands::List => {
            info!(kind = %cfg.kind, ns = ?cfg.selector.namespace, "list invoked");
            let snap = list_snapshot(&lw, &cfg.selector, cfg.kind).await.context("listing snapshot")?;
            if output == Output::Human {
                println!("list result:");
            }
            for item in &snap.items {
                print_item(output, item);
            }
            if output == Output::Human {
                println!("resourceVersion: {}", snap.version);
            }
        }
        Commands::Watch { rewatch } => {
            info!(kind = %cfg.kind, ns = ?cfg.selector.namespace, rewatch, "watch invoked");
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let mut cache = Cache::new();
            let snap = list_snapshot(&lw, &cfg.selector, cfg.kind).await.context("listing snapshot")?;
            if output == Output::Human {
                println!("list result:");
            }
            for item in &snap.items {
                print_item(output, item);
            }
            cache.replace(snap.items);
            let mut version = snap.version;

            if output == Output::Human {
                println!("Start watching...");
            }
            let subscriber = Subscriber::from_config(&cfg);
            loop {
                let mut sink = |ev: ChangeEvent| {
                    if cache.apply(&ev).is_change() {
                        print_event(output, &ev);
                    }
                };
                let summary = subscriber.run(&lw, &cfg.selector, &version, &cancel, &mut sink).await;
                info!(dispatched = summary.dispatched, skipped = summary.skipped, cached = cache.len(), "watch ended");
                match next_step(&summary.termination, rewatch, cancel.is_cancelled()) {
                    Next::Exit => {
                        if let Termination::StreamClosed = summary.termination {
                            warn!("Broken channel");
                        }
                        if output == Output::Human {
                            println!("exit");
                        }
                        break;
                    }
                    Next::Resubscribe => {
                        warn!("Broken channel; re-subscribing");
                        version = summary.resume_version;
                    }
                    Next::Relist => {
                        warn!(termination = ?summary.termination, "resourceVersion expired; re-listing");
                        let snap = list_snapshot(&lw, &cfg.selector, cfg.kind).await.context("re-listing snapshot")?;
                        for ev in cache.replace(snap.items) {
                            print_event(output, &ev);
                        }
                        version = snap.version;
                    }
                    Next::Fail => {
                        if let Termination::Errored(e) = summary.termination {
                            return Err(e).context("watch failed");
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
