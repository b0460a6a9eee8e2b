//! Deep topology discovery.
//!
//! Ten evidence sources run concurrently under their own budgets, their
//! hints are resolved into at most one parent per host, and the result is
//! applied in one transaction.

pub mod apply;
pub mod hints;
pub mod sources;

use std::time::Instant;

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::server::error::Error;
use crate::store::Store;
use apply::ApplyOutcome;
use hints::Hint;
use sources::{DiscoveryContext, EvidenceSource};

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub hints_collected: usize,
    pub per_source: Vec<(&'static str, usize)>,
    pub outcome: ApplyOutcome,
    pub elapsed_secs: f64,
}

fn all_sources() -> Vec<Box<dyn EvidenceSource>> {
    vec![
        Box::new(sources::arp::ArpSource),
        Box::new(sources::traceroute::TracerouteSource),
        Box::new(sources::rtt::RttSource),
        Box::new(sources::snmp::SnmpSource),
        Box::new(sources::mdns::MdnsSource),
        Box::new(sources::ssdp::SsdpSource),
        Box::new(sources::ttl::TtlSource),
        Box::new(sources::uisp::UispSource),
        Box::new(sources::fritzbox::FritzboxSource),
        Box::new(sources::proxmox::ProxmoxSource),
    ]
}

/// One full discovery run: collect, resolve, apply.
pub async fn run(store: &Store, cancel: CancellationToken) -> Result<DiscoveryReport, Error> {
    let started = Instant::now();

    let ctx = DiscoveryContext {
        store: store.clone(),
        hosts: store.all_hosts().await?,
        communities: store.snmp_communities().await?,
        unifi: store.unifi_credentials().await?,
        cancel,
    };

    tracing::info!("deep discovery started over {} hosts", ctx.hosts.len());

    let sources = all_sources();
    let collections = join_all(sources.iter().map(|source| {
        let ctx = &ctx;
        async move {
            let name = source.name();
            match timeout(source.budget(), source.collect(ctx)).await {
                Ok(Ok(hints)) => (name, hints),
                Ok(Err(e)) => {
                    // A broken source degrades to zero hints; the run goes on.
                    tracing::warn!("evidence source {} failed: {}", name, e);
                    (name, Vec::new())
                }
                Err(_) => {
                    tracing::warn!(
                        "evidence source {} exceeded its {}s budget",
                        name,
                        source.budget().as_secs()
                    );
                    (name, Vec::new())
                }
            }
        }
    }))
    .await;

    let mut per_source = Vec::new();
    let mut all_hints: Vec<Hint> = Vec::new();
    for (name, hints) in collections {
        tracing::info!("source {} produced {} hints", name, hints.len());
        per_source.push((name, hints.len()));
        all_hints.extend(hints);
    }

    let gateway_ip = sources::default_gateway_ip().await;
    let outcome = apply::apply_hints(store, &all_hints, gateway_ip.as_deref()).await?;

    let elapsed_secs = started.elapsed().as_secs_f64();
    tracing::info!(
        "deep discovery finished in {:.1}s: {} hints, {} parents applied, {} edges dropped, {} hosts enriched",
        elapsed_secs,
        all_hints.len(),
        outcome.parents_applied,
        outcome.edges_dropped,
        outcome.hosts_enriched
    );

    Ok(DiscoveryReport {
        hints_collected: all_hints.len(),
        per_source,
        outcome,
        elapsed_secs,
    })
}
