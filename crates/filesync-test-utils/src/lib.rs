//! Shared test utilities for the filesync workspace.
//!
//! Fixtures for the collaborators the engine talks to, so crate test suites
//! do not each grow their own. It is a dev-dependency only and never
//! published.
//!
//! # Modules
//!
//! - [`project`]: [`TestProject`], a temporary synced directory
//! - [`remote`]: [`FakeRemote`], an in-memory versioned remote filesystem
//! - [`transport`]: [`FakeTransport`], a subscription transport driven by
//!   the test
//! - [`prompt`]: [`ScriptedPrompter`], canned answers to engine prompts

pub mod project;
pub mod prompt;
pub mod remote;
pub mod transport;

pub use project::TestProject;
pub use prompt::ScriptedPrompter;
pub use remote::FakeRemote;
pub use transport::FakeTransport;

/// Route `tracing` output to the test harness. Honours `RUST_LOG`; safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
