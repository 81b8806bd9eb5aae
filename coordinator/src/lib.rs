mod coordinator;
mod error;

#[cfg(test)]
mod test_support;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
