#![forbid(unsafe_code)]
#![deny(
    bad_style,
    meta_variable_misuse,
    non_ascii_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    trivial_casts,
    unused_must_use
)]

//! Shared vocabulary types and traits for the Zettai event-sourced storage core.
//!
//! This crate provides the foundational types shared between the `zettai`
//! facade crate and the backend crates `zettai-memory` and `zettai-postgres`.
//!
//! # Overview
//!
//! This crate contains:
//! - Execution abstraction: [`ContextReader`], [`ContextProvider`]
//! - Event log port: [`EventStreamer`], [`EntityEvent`]
//! - Domain types: [`EntityId`], [`EventSeq`], [`StoredEvent`]
//! - Read models: [`Projector`], [`catch_up`]
//! - Errors: [`Outcome`], [`ContextError`], [`Fault`], [`ReaderPanicked`]

mod context;
mod errors;
mod event;
mod projection;
mod streamer;

pub use context::{ContextProvider, ContextReader};
pub use errors::{ContextError, Fault, Outcome, ReaderPanicked};
pub use event::{EntityEvent, EntityId, EventSeq, StoredEvent};
pub use projection::{catch_up, Projector};
pub use streamer::EventStreamer;
