//! Actor identity resolution.
//!
//! Determines the `createdBy`/`updatedBy`/comment author id from an explicit
//! override or the environment. The authorization layer owns who an actor
//! really is; this only picks the opaque id to record.

use anyhow::{bail, Result};
use std::env;

/// Environment variables checked for actor identity, in priority order.
const IDENTITY_VARS: &[&str] = &["TASKVAULT_ACTOR", "TV_ACTOR"];

/// Fallback to system user
const USER_VAR: &str = "USER";

/// Get the current actor identity.
///
/// Resolution order:
/// 1. Explicit override (`--actor`)
/// 2. TASKVAULT_ACTOR environment variable
/// 3. TV_ACTOR environment variable
/// 4. USER environment variable
pub fn resolve_actor(explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        let name = name.trim();
        if name.is_empty() {
            bail!("Actor id must not be empty");
        }
        return Ok(name.to_string());
    }

    for var in IDENTITY_VARS.iter().chain(std::iter::once(&USER_VAR)) {
        if let Ok(name) = env::var(var) {
            if !name.trim().is_empty() {
                return Ok(name.trim().to_string());
            }
        }
    }

    bail!("Actor identity required. Use --actor <id> or set TASKVAULT_ACTOR.")
}
