//! Process-wide verbosity switch for stage tracing.
//!
//! Stages print their traces with `eprintln!` only when verbose output has
//! been requested (the CLI's `--verbose`). The flag is configuration, not
//! pipeline state: no stage reads anything else from here.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}
