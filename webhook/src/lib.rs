//! The webhook front-end: translates GitLab webhook payloads into the
//! Coordinator's four events
//! (`on-pr-opened`, `on-enqueue-request`, `on-ci-created`, `on-ci-finished`)
//! and filters out deliveries for unknown repositories.

mod error;
pub mod gitlab;
mod installation;
mod server;
mod service;

pub use self::{
    error::{Error, Result},
    installation::Installation,
    server::{Server, ServerBuilder},
    service::EventSink,
};
