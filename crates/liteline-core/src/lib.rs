//! # Liteline Core
//!
//! Core library for the Liteline fault-tolerant TON lite server client.
//!
//! This crate provides the foundational components for:
//!
//! - **[`engine`]**: The engine hierarchy. A [`ConnectionEngine`] per peer, a
//!   [`LoadBalancingEngine`] per peer group and a [`PriorityGroupEngine`] failing over
//!   between groups, all behind the same [`LiteEngine`] trait.
//!
//! - **[`transport`]**: TCP and WebSocket sockets carrying checksummed datagrams, plus
//!   peer URL parsing.
//!
//! - **[`tl`]**: Binary TL primitives and the lite server query envelope.
//!
//! - **[`schema`]**: Typed lite server functions. The application catalog plugs in
//!   through [`schema::LiteFunction`].
//!
//! - **[`config`]**: Layered configuration (defaults, TOML file, environment).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      PriorityGroupEngine                      │
//! │  tier 0 (suppressible)            tier N (always available)   │
//! │  ┌─────────────────────┐          ┌─────────────────────┐     │
//! │  │ LoadBalancingEngine │   ...    │ LoadBalancingEngine │     │
//! │  └──┬───────────────┬──┘          └──────────┬──────────┘     │
//! │     │               │                        │                │
//! │  ┌──▼─────────┐  ┌──▼─────────┐        ┌─────▼──────┐         │
//! │  │ Connection │  │ Connection │        │ Connection │         │
//! │  │   Engine   │  │   Engine   │        │   Engine   │         │
//! │  └──┬─────────┘  └──┬─────────┘        └─────┬──────┘         │
//! └─────┼───────────────┼────────────────────────┼────────────────┘
//!       ▼               ▼                        ▼
//!   lite server     lite server              lite server
//! ```
//!
//! ## Query Flow
//!
//! ```text
//! caller ──► PriorityGroupEngine: probe suppressed tiers, pick first healthy tier
//!        ──► LoadBalancingEngine: rotate over ready peers, retry on error
//!        ──► ConnectionEngine: register query id, send or buffer until ready
//!        ◄── answer matched by query id, decoded (or liteServer.error)
//! ```

pub mod config;
pub mod engine;
pub mod schema;
pub mod tl;
pub mod transport;

pub use engine::{
    ConnectionEngine, EngineError, EngineEvent, EngineGroupBuilder, LiteEngine, LiteEngineExt,
    LoadBalancingEngine, PriorityGroupEngine, QueryArgs,
};
