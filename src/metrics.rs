use crate::engine::Step;
use crate::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    /// Corrective actions taken against ArgoCD
    pub steps: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "argocd_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "argocd_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "instance", "error"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!("argocd_operator_reconciliations_total", "reconciliations"),
            &["kind"],
        )?;
        let steps = IntCounterVec::new(
            opts!(
                "argocd_operator_external_changes_total",
                "creates, updates and deletes sent to ArgoCD",
            ),
            &["kind", "step"],
        )?;
        Ok(Metrics {
            reconciliations,
            failures,
            steps,
            reconcile_duration,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.steps.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, rc: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                rc.name_any().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn external_step<T: kube::Resource<DynamicType = ()>>(&self, step: Step) {
        let label = match step {
            Step::Created => "created",
            Step::Updated => "updated",
            Step::Deleted => "deleted",
            Step::Gone | Step::Unchanged => return,
        };
        self.steps
            .with_label_values(&[T::kind(&()).as_ref(), label])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations
            .with_label_values(&[T::kind(&()).as_ref()])
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tokens::Token;

    #[test]
    fn steps_are_counted_per_kind() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        metrics.external_step::<Token>(Step::Created);
        metrics.external_step::<Token>(Step::Updated);
        metrics.external_step::<Token>(Step::Updated);
        metrics.external_step::<Token>(Step::Unchanged);

        assert_eq!(metrics.steps.with_label_values(&["Token", "updated"]).get(), 2);
        assert_eq!(metrics.steps.with_label_values(&["Token", "created"]).get(), 1);
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "argocd_operator_external_changes_total"));
    }
}
