//! In-memory jobs: the reference Job implementation.
//!
//! Serves bytes registered per URL. Supports optional delivery delays so
//! tests and the demo binary can exercise asynchronous starts, pending
//! reads, and slow loads. Satisfied entirely from memory, so the
//! `will_start_network` checkpoint never runs for these jobs.
//!
//! Range handling follows the permissive single-range model: a reversed or
//! unsatisfiable single range falls back to serving the full body, while a
//! multi-range request fails with `RangeNotSatisfiable` (only single ranges
//! are supported).

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::job::{Job, JobContext, JobFactory, ReadOutcome};
use crate::messages::{ErrorCode, RequestDescriptor, ResponseHead, SecurityInfo};

/// One registered resource.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    pub body: Bytes,
    pub mime_type: String,
    pub security_info: Option<SecurityInfo>,
    /// Delay before headers are reported; zero reports on the next
    /// dispatcher turn.
    pub start_delay: Duration,
    /// Delay applied to every read; zero reads complete synchronously.
    pub read_delay: Duration,
}

impl MemoryResource {
    pub fn new(body: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            mime_type: mime_type.into(),
            security_info: None,
            start_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_security_info(mut self, info: SecurityInfo) -> Self {
        self.security_info = Some(info);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

/// Factory serving URLs registered ahead of time.
#[derive(Default)]
pub struct MemoryJobFactory {
    resources: HashMap<String, MemoryResource>,
}

impl MemoryJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: &str, resource: MemoryResource) {
        self.resources.insert(url.to_string(), resource);
    }
}

impl JobFactory for MemoryJobFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self, descriptor: &RequestDescriptor) -> Option<Box<dyn Job>> {
        let resource = self.resources.get(descriptor.url.as_str())?.clone();
        match apply_range(&resource.body, descriptor.header("range")) {
            RangedBody::Full(body) => Some(Box::new(MemoryJob::new(resource, body, 200))),
            RangedBody::Partial(body) => Some(Box::new(MemoryJob::new(resource, body, 206))),
            RangedBody::Unsatisfiable => Some(Box::new(FailingJob {
                code: ErrorCode::RangeNotSatisfiable,
            })),
        }
    }
}

enum RangedBody {
    Full(Bytes),
    Partial(Bytes),
    Unsatisfiable,
}

/// Apply a `Range` header to `body`.
///
/// Multi-range requests are rejected rather than silently serving the first
/// range. Any single range that cannot be satisfied (reversed, start past
/// the end, unparseable) falls back to the full body.
fn apply_range(body: &Bytes, range: Option<&str>) -> RangedBody {
    let Some(range) = range else {
        return RangedBody::Full(body.clone());
    };
    let Some(spec) = range.strip_prefix("bytes=") else {
        return RangedBody::Full(body.clone());
    };
    if spec.contains(',') {
        return RangedBody::Unsatisfiable;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangedBody::Full(body.clone());
    };
    let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) else {
        return RangedBody::Full(body.clone());
    };
    if start > end || start >= body.len() {
        // Permissive fallback: treat as if no range had been specified.
        return RangedBody::Full(body.clone());
    }
    let end = end.min(body.len() - 1);
    RangedBody::Partial(body.slice(start..=end))
}

/// Job serving one registered resource.
pub struct MemoryJob {
    resource: MemoryResource,
    body: Bytes,
    status: u16,
    offset: usize,
}

impl MemoryJob {
    fn new(resource: MemoryResource, body: Bytes, status: u16) -> Self {
        Self {
            resource,
            body,
            status,
            offset: 0,
        }
    }

    fn head(&self) -> ResponseHead {
        ResponseHead {
            status: self.status,
            mime_type: self.resource.mime_type.clone(),
            content_length: Some(self.body.len() as u64),
            security_info: self.resource.security_info,
        }
    }

    fn next_chunk(&mut self, max: usize) -> Bytes {
        let remaining = self.body.len() - self.offset;
        let len = remaining.min(max);
        let chunk = self.body.slice(self.offset..self.offset + len);
        self.offset += len;
        chunk
    }
}

impl Job for MemoryJob {
    fn start(&mut self, ctx: &JobContext) {
        let head = self.head();
        if self.resource.start_delay.is_zero() {
            ctx.started(head);
        } else {
            let ctx = ctx.clone();
            let delay = self.resource.start_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                ctx.started(head);
            });
        }
    }

    fn read(&mut self, max: usize, ctx: &JobContext) -> ReadOutcome {
        let chunk = self.next_chunk(max);
        if self.resource.read_delay.is_zero() {
            ReadOutcome::Ready(chunk)
        } else {
            let ctx = ctx.clone();
            let delay = self.resource.read_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                ctx.read_done(Ok(chunk));
            });
            ReadOutcome::Pending
        }
    }

    fn kill(&mut self) {
        // Delayed callbacks for a killed record are dropped by the
        // dispatcher, so there is nothing to unwind here.
        self.offset = self.body.len();
    }

    fn uses_network(&self) -> bool {
        false
    }
}

/// Job that fails at start with a fixed code.
struct FailingJob {
    code: ErrorCode,
}

impl Job for FailingJob {
    fn start(&mut self, ctx: &JobContext) {
        ctx.failed(self.code);
    }

    fn read(&mut self, _max: usize, _ctx: &JobContext) -> ReadOutcome {
        ReadOutcome::Err(self.code)
    }

    fn kill(&mut self) {}

    fn uses_network(&self) -> bool {
        false
    }
}
