// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A non-blocking, readiness-based HTTP/1.1 connection engine.
//!
//! This crate is the core of a server, not a server on its own: it
//! multiplexes many client sockets across a fixed pool of worker
//! threads, drives each through a request/response state machine, and
//! streams responses back out. Routing, static file serving, TLS, and
//! configuration-file loading are deliberately left to layers built on
//! top of it; see [`response::RequestHandler`] for the seam.
//!
//! Start here: [`config::Config`] to describe a deployment,
//! [`server::Server::start`] to run it.

pub mod acceptor;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod efdt;
pub mod error;
pub mod multiplex;
pub mod parser;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod timeout;
pub mod worker;
