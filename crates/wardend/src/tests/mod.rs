//! Test suites for the warden node supervisor.

mod stop_request_behaviour;
pub(crate) mod support;
