use serde::Serialize;

use crate::metric::Metric;
use crate::tags::Tags;

/// Instrumentation scope of a batch, i.e. which receiver produced it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Scope {
    pub name: String,
    pub version: String,
}

/// The output of one collection cycle.
///
/// `metrics` is append-only while the cycle runs, consumers must not depend
/// on the order of points within one metric family.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricBatch {
    pub resource: Tags,
    pub scope: Scope,
    pub metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn new(scope: Scope, resource: Tags) -> Self {
        Self {
            resource,
            scope,
            metrics: Vec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Every metric with the given name, in insertion order.
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Metric> + 'a {
        self.metrics.iter().filter(move |m| m.name == name)
    }
}

impl Extend<Metric> for MetricBatch {
    fn extend<T: IntoIterator<Item = Metric>>(&mut self, iter: T) {
        self.metrics.extend(iter)
    }
}
