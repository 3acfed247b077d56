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

//! Test support for Zettai storage backends.
//!
//! - [`contract`]: the behavioral suite every `EventStreamer` backend runs,
//!   wired up with [`streamer_contract_tests!`]
//! - [`chaos`]: a provider wrapper that injects faults
//! - [`event_collector`]: a projector recording what it was fed

pub mod chaos;
pub mod contract;
pub mod event_collector;

pub use chaos::*;
pub use contract::{ContractBackend, ContractTestEvent, ContractTestFailure, ContractTestResult};
pub use event_collector::EventCollector;
