//! Service binary support: admin HTTP listener and process wiring.

pub mod app;
