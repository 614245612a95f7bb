//! loadgate — a browser-style resource loading dispatcher.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 DISPATCHER                    │
//!                        │                                               │
//!   ClientMessage        │  ┌───────────┐   ┌──────────┐   ┌─────────┐  │
//!   ─────────────────────┼─▶│ admission │──▶│ throttle │──▶│   job   │  │
//!                        │  │  ledger   │   │  chain   │   │ registry│  │
//!                        │  └───────────┘   └──────────┘   └────┬────┘  │
//!                        │                                      │       │
//!                        │                                      ▼       │
//!   DispatcherMessage    │  ┌───────────┐   ┌──────────┐   ┌─────────┐  │
//!   ◀────────────────────┼──│  client   │◀──│   body   │◀──│   Job   │  │
//!                        │  │   sink    │   │   pump   │   │ (bytes) │  │
//!                        │  └───────────┘   └──────────┘   └─────────┘  │
//!                        │                                               │
//!                        │  ┌─────────────────────────────────────────┐ │
//!                        │  │          Cross-Cutting Concerns          │ │
//!                        │  │  config · observability · lifecycle      │ │
//!                        │  │  routes (blocking) · detach · transfer   │ │
//!                        │  └─────────────────────────────────────────┘ │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! One dispatcher task owns every in-flight load. Clients, Jobs, throttles,
//! and timers all communicate with it through a single command queue, which
//! serializes every state change and fixes the per-request notification
//! order: `ResponseStarted`, body chunks, then exactly one `Completed`.
//!
//! The crate is embedded by a host that supplies three things: client
//! connections (a [`client::ClientSink`] per peer), job factories for the
//! URL schemes it serves, and a [`throttle::ThrottleProvider`] for its
//! policies. The demo binary wires all three from in-memory parts.

// Core subsystems
pub mod admission;
pub mod client;
pub mod dispatcher;
pub mod files;
pub mod job;
pub mod messages;
pub mod throttle;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use messages::{ClientId, ClientMessage, DispatcherMessage, ErrorCode, RequestId, RouteId};
