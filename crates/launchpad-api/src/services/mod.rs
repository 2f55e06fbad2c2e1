//! Clients for external collaborators.

pub mod github;
