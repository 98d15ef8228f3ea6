//! Test modules for the bridge

mod dispatcher_tests;
mod supervisor_tests;
