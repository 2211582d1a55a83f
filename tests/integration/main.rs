//! Integration tests for the JWKS provider pipeline.

mod pipeline;
mod remote_source;
mod support;
