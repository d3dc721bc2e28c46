//! Multi-protocol echo server library.
//!
//! Echo-app answers every request with a JSON (or protobuf) document
//! describing the inbound request and the identity of the answering
//! server. It is a debugging tool for load balancers, service meshes,
//! ingress gateways and Kubernetes networking.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                │                  Manager                     │
//!                │  starts listeners, supervises, drains them   │
//!                └──────┬───────┬───────┬──────┬───────┬────────┘
//!                       │       │       │      │       │
//!                    ┌──▼──┐ ┌──▼──┐ ┌──▼──┐ ┌─▼───┐ ┌─▼─────┐
//!                    │HTTP │ │ TLS │ │ TCP │ │gRPC │ │ QUIC  │  + Metrics
//!                    └──┬──┘ └──┬──┘ └──┬──┘ └─┬───┘ └─┬─────┘
//!                       │       │       │      │       │
//!                ┌──────▼───────▼───────▼──────▼───────▼────────┐
//!                │        echo response builder + metrics       │
//!                └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod echo;
pub mod net;
pub mod proto;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::Config;
pub use lifecycle::DrainControl;
pub use observability::Metrics;
pub use server::{Manager, Server};
