use crate::reconcile::{Error, Outcome};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<ResultLabels, Counter>,
    mutations: Family<MutationLabels, Counter>,
    retries: Counter,
    pending: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct MutationLabels {
    op: String,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of reconcile passes by result",
            reconciles.clone(),
        );

        let mutations = Family::default();
        prom.register(
            "binding_mutations",
            "Count of bindings created, updated and deleted",
            mutations.clone(),
        );

        let retries = Counter::default();
        prom.register(
            "retries",
            "Count of reconciles rescheduled after a failure",
            retries.clone(),
        );

        let pending = Gauge::default();
        prom.register(
            "pending",
            "Gauge of the number of instances waiting to be reconciled",
            pending.clone(),
        );

        Self {
            reconciles,
            mutations,
            retries,
            pending,
        }
    }

    pub(crate) fn reconciled(&self, outcome: &Outcome) {
        let result = if outcome.orphaned { "orphaned" } else { "ok" };
        self.reconcile_result(result);
        for (op, n) in [
            ("create", outcome.created),
            ("update", outcome.updated),
            ("delete", outcome.deleted),
        ] {
            if n > 0 {
                self.mutations
                    .get_or_create(&MutationLabels { op: op.to_string() })
                    .inc_by(n as u64);
            }
        }
    }

    pub(crate) fn failed(&self, error: &Error) {
        let result = match error {
            Error::AmbiguousBinding { .. } => "ambiguous",
            _ if error.is_not_found() => "not_found",
            _ => "error",
        };
        self.reconcile_result(result);
    }

    pub(crate) fn retried(&self) {
        self.retries.inc();
    }

    pub(crate) fn set_pending(&self, n: usize) {
        self.pending.set(n as i64);
    }

    fn reconcile_result(&self, result: &str) {
        self.reconciles
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }
}
