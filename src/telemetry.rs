//! Process-wide logging initialization.
//!
//! A single global `tracing` subscriber, installed once. Idempotent so
//! `DocStore::open` can call it unconditionally without clobbering a
//! subscriber the embedding application already installed.

/// Install a default `fmt` subscriber if none is set yet.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .try_init();
}
