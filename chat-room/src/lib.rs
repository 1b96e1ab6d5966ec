//! A single chat room that fans every message out to every connected client.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`hub`] owns room membership. One task processes joins, leaves and
//!   forwarded messages in order, and evicts clients whose outbound queue is
//!   full instead of waiting for them.
//! - [`connection`] pairs a client transport with its outbound queue and
//!   runs the inbound and outbound pumps.
//! - [`trace`] provides the event sinks the hub reports its activity to.
//! - [`transport`] adapts WebSockets and newline-delimited TCP streams into
//!   message streams and sinks.
//! - [`server`] serves the chat page, the `/room` WebSocket and `/stats`.
//! - [`listener`] admits raw TCP clients.
//! - [`cli`] and [`config`] describe the command line and room limits.
//! - [`client`] is a terminal client for the TCP listener.
//!
//! Integration tests use this crate directly to exercise the hub over real
//! sockets.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod hub;
pub mod listener;
pub mod server;
pub mod trace;
pub mod transport;
