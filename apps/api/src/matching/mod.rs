//! The matching core: scorers, insight accumulation, candidate set
//! management, and the termination state machine.

pub mod candidate_set;
pub mod collaborative;
pub mod content_based;
pub mod hybrid;
pub mod insights;
pub mod rescoring;
pub mod termination;
