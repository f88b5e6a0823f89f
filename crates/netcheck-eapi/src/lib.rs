//! # netcheck-eapi
//!
//! Minimal asynchronous eAPI client for the netcheck engine.
//!
//! eAPI is a JSON-RPC 2.0 interface exposed by network operating systems over
//! HTTP(S); the single method of interest is `runCmds`, which executes a batch
//! of CLI commands and returns one structured payload per command.
//!
//! This crate provides:
//! - Request/response wire types for `runCmds`
//! - [`EapiClient`], a connection-pooled client with typed failures that
//!   distinguish "the device rejected a command" from transport errors
//! - A cheap TCP reachability probe used before any command is sent

mod client;
mod request;

pub use client::{ClientLimits, ClientTimeouts, EapiClient, EapiConfig, EapiError, Protocol};
pub use request::{EapiRequest, EapiResponse, RawCommand, ResponseFormat, RpcError, Version};
