//! aeroquery-gateway — the HTTP/SSE transport (§6): `POST /chat`, `POST
//! /chat/stream`, `GET /sessions/{id}`, `DELETE /sessions/{id}`, `GET
//! /health`. Transport is explicitly out of scope for the core's design;
//! this crate is the one concrete binding that exercises the Agent Pipeline.

pub mod auth;
pub mod server;

pub use server::{start_gateway, ExtendedConfig};
