//! x402 monetizing gateway.
//!
//! An HTTP reverse proxy that sits in front of third-party APIs and enforces
//! micropayment-per-request using the HTTP 402 payment protocol. Clients
//! discover priced endpoints, present cryptographic proof of stablecoin
//! payment on one of three settlement rails, and the gateway verifies the
//! payment before forwarding the request upstream.
//!
//! Rails:
//! - **MegaETH** (fast rail): the client pays on-chain first and submits the
//!   transaction hash; the gateway reads the receipt directly from RPC and
//!   validates the stablecoin `Transfer` event.
//! - **Base** and **Solana** (permit rails): the client submits a signed
//!   permit which is verified and settled through an external facilitator.
//!
//! Replay protection for the fast rail lives in Postgres: a transaction hash
//! is accepted at most once, enforced by the `used_tx_hashes` primary key.

pub mod advertise;
pub mod app;
pub mod cache;
pub mod chain;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod facilitator;
pub mod facilitator_fast;
pub mod facilitator_http;
pub mod handlers;
pub mod ledger;
pub mod network;
pub mod payment;
pub mod price;
pub mod security;
pub mod services;
pub mod sig_down;
pub mod telemetry;
pub mod types;
pub mod upstream;
