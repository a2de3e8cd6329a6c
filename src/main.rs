// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! cfgate operator entry point.
//!
//! Starts one controller per CRD plus the metrics server, and runs until
//! any of them stops or a termination signal arrives.

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cfgate::constants::{METRICS_SERVER_PORT, TOKIO_WORKER_THREADS};
use cfgate::context::Context;
use cfgate::crd::{CloudflareAccessPolicy, CloudflareDNS, CloudflareTunnel};
use cfgate::metrics::{run_metrics_server, Metrics};
use cfgate::reconcilers;

/// Cloudflare Tunnel, DNS and Access operator for Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "cfgate", version, about)]
struct Args {
    /// Port for the Prometheus metrics and health endpoint.
    #[arg(long, default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,

    /// Limit the operator to a single namespace instead of cluster scope.
    #[arg(long)]
    namespace: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v == "json");
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("cfgate-worker")
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting cfgate");

    let client = Client::try_default().await?;
    let metrics = Arc::new(Metrics::new()?);
    let ctx = Arc::new(Context::new(client.clone(), Arc::clone(&metrics)));

    let (tunnels, dns, policies) = match args.namespace.as_deref() {
        Some(ns) => (
            Api::<CloudflareTunnel>::namespaced(client.clone(), ns),
            Api::<CloudflareDNS>::namespaced(client.clone(), ns),
            Api::<CloudflareAccessPolicy>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::<CloudflareTunnel>::all(client.clone()),
            Api::<CloudflareDNS>::all(client.clone()),
            Api::<CloudflareAccessPolicy>::all(client.clone()),
        ),
    };

    let tunnel_controller = Controller::new(tunnels, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconcilers::tunnel::reconcile,
            reconcilers::tunnel::error_policy,
            Arc::clone(&ctx),
        )
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(error = %err, "tunnel controller event error");
            }
        });

    let dns_controller = Controller::new(dns, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconcilers::dns::reconcile,
            reconcilers::dns::error_policy,
            Arc::clone(&ctx),
        )
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(error = %err, "dns controller event error");
            }
        });

    let policy_controller = Controller::new(policies, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconcilers::access::reconcile,
            reconcilers::access::error_policy,
            Arc::clone(&ctx),
        )
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(error = %err, "access policy controller event error");
            }
        });

    tokio::select! {
        () = tunnel_controller => info!("tunnel controller stopped"),
        () = dns_controller => info!("dns controller stopped"),
        () = policy_controller => info!("access policy controller stopped"),
        result = run_metrics_server(metrics, args.metrics_port) => {
            result?;
            info!("metrics server stopped");
        }
    }
    Ok(())
}
