//! Content source selection: ordered registry of job factories.
//!
//! # Design Decisions
//! - Factories are consulted in host-supplied order, so custom-scheme
//!   handlers registered first win over generic network handling
//! - A factory declines by returning `None`; if every factory declines the
//!   dispatcher completes the request with `UnsupportedScheme`

use crate::job::Job;
use crate::messages::RequestDescriptor;

/// Creates a Job for descriptors it knows how to serve.
pub trait JobFactory: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Return a Job for this request, or `None` to decline.
    fn create(&self, descriptor: &RequestDescriptor) -> Option<Box<dyn Job>>;
}

/// Ordered collection of factories, consulted first to last.
#[derive(Default)]
pub struct JobRegistry {
    factories: Vec<Box<dyn JobFactory>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory. Registration order is priority order.
    pub fn register(&mut self, factory: Box<dyn JobFactory>) {
        self.factories.push(factory);
    }

    /// Find the first factory that accepts the descriptor.
    pub fn create(&self, descriptor: &RequestDescriptor) -> Option<Box<dyn Job>> {
        for factory in &self.factories {
            if let Some(job) = factory.create(descriptor) {
                tracing::trace!(factory = factory.name(), url = %descriptor.url, "job created");
                return Some(job);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
