//! feedpipe: a multi-tenant data-import pipeline engine
//!
//! A pipeline fetches raw content from a configured source, parses it into
//! rows, filters, maps and prepares them, and saves the result, as seven
//! fixed-order stages over one shared run context. Sources, formats,
//! filter operators, transformers and resolvers are all pluggable behind
//! name-keyed registries sharing one option-validation contract.

pub mod config;
pub mod downloader;
pub mod errors;
pub mod execution;
pub mod filter;
pub mod jobs;
pub mod mapper;
pub mod models;
pub mod options;
pub mod pipeline;
pub mod prepare;
pub mod reader;
pub mod scheduling;
pub mod storage;
pub mod utils;

pub use errors::{EngineError, EngineResult};
pub use pipeline::{Orchestrator, PipelineReport, ValidationIssue};
