//! Wait time estimation for queue update notices

pub mod calculator;

pub use calculator::{PairwiseWaitTimeEstimator, WaitTimeConfig, WaitTimeEstimator};
