use crate::{
    index::{self, Index},
    k8s,
    lease,
    metrics::ControllerMetrics,
    reconcile::{Reconciler, TemplateRouter},
    scheduler::{self, Backoff, Leadership, Scheduler},
    store::KubeStore,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "scope-controller",
    about = "Grants access described by ScopeTemplates and ScopeInstances"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "scope_controller=info,warn",
        env = "SCOPE_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "scope-controller")]
    controller_namespace: String,

    #[clap(long, default_value = "scope-controller")]
    controller_deployment_name: String,

    /// Runs without acquiring the write lease. Only one replica may run in
    /// this mode.
    #[clap(long)]
    leader_election_disabled: bool,

    #[clap(long, default_value = "5000")]
    store_timeout_ms: u64,

    #[clap(long, default_value = "4")]
    max_concurrent_reconciles: usize,

    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "500")]
    retry_backoff_min_ms: u64,

    #[clap(long, default_value = "60000")]
    retry_backoff_max_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            controller_namespace,
            controller_deployment_name,
            leader_election_disabled,
            store_timeout_ms,
            max_concurrent_reconciles,
            resync_period_secs,
            retry_backoff_min_ms,
            retry_backoff_max_ms,
        } = self;

        let backoff = Backoff {
            min: Duration::from_millis(retry_backoff_min_ms),
            max: Duration::from_millis(retry_backoff_max_ms.max(retry_backoff_min_ms)),
        };

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("scope_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let leadership = if leader_election_disabled {
            info!("Leader election disabled");
            Leadership::Always
        } else {
            let hostname = std::env::var("HOSTNAME")
                .context("failed to fetch `HOSTNAME` environment variable")?;
            lease::acquire(
                &runtime,
                &controller_namespace,
                &controller_deployment_name,
                hostname,
            )
            .await?
        };

        let store = Arc::new(KubeStore::new(
            runtime.client(),
            Duration::from_millis(store_timeout_ms),
        ));
        let (queue, keys) = scheduler::queue();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let scope_index = Index::shared(queue.clone(), changes_tx);

        // Spawn resource watches.

        let instances = runtime.watch_all::<k8s::ScopeInstance>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(scope_index.clone(), instances)
                .instrument(info_span!("scopeinstances")),
        );

        let templates = runtime.watch_all::<k8s::ScopeTemplate>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(scope_index, templates).instrument(info_span!("scopetemplates")),
        );

        tokio::spawn(
            index::route_templates(TemplateRouter::new(store.clone()), changes_rx, queue.clone())
                .instrument(info_span!("router")),
        );

        tokio::spawn(
            index::resync(
                store.clone(),
                queue.clone(),
                Duration::from_secs(resync_period_secs.max(1)),
            )
            .instrument(info_span!("resync")),
        );

        let scheduler = Scheduler::new(
            Reconciler::new(store),
            (queue, keys),
            leadership,
            max_concurrent_reconciles,
            backoff,
            metrics,
        );
        tokio::spawn(
            scheduler
                .run(runtime.shutdown_handle())
                .instrument(info_span!("scheduler")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
