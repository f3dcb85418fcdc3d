//! Atelier: a multi-agent orchestration engine that turns an interior
//! design project brief into a reviewed, aggregated analysis report.
//!
//! The workflow is a resumable stage graph with human-in-the-loop gates:
//! requirements analysis and confirmation, a calibration questionnaire,
//! feasibility assessment, dynamic expert-team selection over the fixed
//! V2–V6 dependency order, batched expert execution with challenge
//! detection, bounded red/blue/client review, and final aggregation. Every
//! stage transition checkpoints, so a session can suspend for user input
//! and resume later, including across processes.

pub mod adapters;
pub mod agents;
pub mod catalog;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod orchestrator;
pub mod services;
