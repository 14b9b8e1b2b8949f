//! # servio-core
//!
//! Pure domain types for the servio control plane: the persisted entities
//! (projects, services, settings), the request DTOs accepted by the JSON
//! API, and the error taxonomy shared by every layer of the daemon.
//!
//! This crate performs no I/O. Side effects (the store, the supervisor
//! adapter, the synthesizers) live in `servio-server`.

pub mod error;
pub mod model;

pub use error::{Error, Result};
pub use model::{
    CreateProjectRequest, CreateServiceRequest, Project, Service, UpdateProjectRequest,
    UpdateServiceRequest,
};
