//! Agent System
//!
//! The research agents the mission runner drives, one per phase:
//!
//! - **Planning Agent**: turns the goal into a research plan
//! - **Discovery Agent**: broad grounded searches that surface candidates
//! - **Deep-Dive Scheduler**: targeted sub-queries per candidate
//! - **Comparison Agent**: pairwise notes between the strongest findings
//! - **Validation Agent**: re-checks cited facts of the top findings
//! - **Synthesis Agent**: the final executive report
//!
//! ## Pipeline Overview
//!
//! ```text
//! Research Goal
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Planning   │  → strategy + discovery queries
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Discovery  │  → candidates (parallel searches)
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Deep Dive  │  → findings (lead query, then fan out)
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐     ┌─────────────┐
//! │ Comparison  │ ──► │ Validation  │
//! └─────────────┘     └─────────────┘
//!      │
//!      ▼
//!  score ⇄ self-correct (narrowed re-queries)
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Synthesis  │  → report + exports
//! └─────────────┘
//! ```

pub mod comparison;
pub mod correction;
pub mod deep_dive;
pub mod discovery;
pub mod planning;
pub mod query_planner;
pub mod synthesis;
pub mod validation;

pub use comparison::ComparisonAgent;
pub use deep_dive::{DeepDiveOutcome, DeepDiveScheduler};
pub use discovery::DiscoveryAgent;
pub use planning::PlanningAgent;
pub use query_planner::{PlannedQuery, QueryPlanner};
pub use synthesis::SynthesisAgent;
pub use validation::ValidationAgent;
