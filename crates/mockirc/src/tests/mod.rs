//! Test suites for the mock server.

mod support;
