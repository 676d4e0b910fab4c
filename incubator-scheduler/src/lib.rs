//! Protocol and imaging scheduler for the incubator agent
//!
//! [`ProtocolScheduler::tick`] reads the running [`Experiment`] and its
//! [`Protocol`], applies the step in effect to the control board and triggers
//! one thumbnail capture per imaging interval.
//!
//! [`Experiment`]: incubator_state::models::Experiment
//! [`Protocol`]: incubator_state::models::Protocol

pub mod error;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use scheduler::{
    capture_slot, select_step, ProtocolScheduler, SchedulerSettings, TickOutcome,
};
