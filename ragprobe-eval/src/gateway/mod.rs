//! # HTTP Gateway
//!
//! Exposes the evaluation pipelines over HTTP: job submission and polling,
//! synchronous runs, registry listings and candidate reranking.

mod server;

pub use server::{
    ApiError, AppState, REQUEST_ID_HEADER, SharedState, router as gateway_router, run as run_gateway,
};
