//! Terminal front end for the reconciliation engine
//!
//! The engine itself lives in the `declarative` crate. This module:
//! 1. Displays plans
//! 2. Reports progress and asks for confirmation
//! 3. Summarizes results

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{BarProgress, PromptConfirm, print_summary};
