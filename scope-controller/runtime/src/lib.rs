#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use scope_controller_k8s_api as k8s;
pub use scope_controller_k8s_reconcile as reconcile;

mod args;
mod index;
mod lease;
mod metrics;
mod scheduler;
mod store;

pub use self::{
    args::Args,
    index::Index,
    metrics::ControllerMetrics,
    scheduler::{Backoff, Leadership, Queue, Scheduler},
    store::KubeStore,
};
