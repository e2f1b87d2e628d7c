//! Infrastructure layer: broker connection, dispatch loop, persistence,
//! downstream notification and configuration.

pub mod broker;
pub mod config;
pub mod notify;
pub mod store;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;
