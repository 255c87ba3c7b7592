// SPDX-License-Identifier: PMPL-1.0-or-later

//! Cloud-Ambush: detonate attack techniques against live cloud accounts.
//!
//! Each technique describes prerequisite infrastructure (Terraform), a
//! detonation, an optional revert and optional extra cleanup. This crate
//! drives techniques through their lifecycle and remembers where each one
//! stands between invocations.
//!
//! ENGINE PILLARS:
//! 1. **Runner**: the COLD / WARM / DETONATED state machine with guards
//!    and force overrides.
//! 2. **State**: one directory per technique holding the extracted
//!    Terraform source, the applied outputs and the state token.
//! 3. **Terraform**: a pinned Terraform binary driven as a subprocess.
//! 4. **Batch**: a bounded worker pool running one runner per technique.

pub mod auth;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod registry;
pub mod report;
pub mod runner;
pub mod state;
pub mod technique;
pub mod terraform;
pub mod types;
