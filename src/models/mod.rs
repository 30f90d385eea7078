//! Request and Response models for the cache server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies that are not
//! engine types themselves.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{
    ActorRequest, ClearRequest, InvalidateRequest, PutEntryRequest, TagsRequest, WarmupRequest,
};
pub use responses::{
    CountResponse, DeleteResponse, EntryResponse, HealthResponse, InvalidateResponse,
    MissResponse, WarmupResponse,
};
