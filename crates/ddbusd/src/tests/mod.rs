//! Test suites for the listener crate.

mod lib_api;
pub(crate) mod support;
