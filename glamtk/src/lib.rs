//! CLI front-end for the generalized language modeling toolkit: option
//! parsing, estimator selection/scoring, and query-file parsing sit here as
//! external collaborators around `glamtk_core`'s counting/caching pipeline
//! (spec §1 "out of scope").

pub mod app;
pub mod estimator;
pub mod query;

pub use app::{BuildApp, QueryApp, TrainInfo};
pub use estimator::{Estimator, EstimatorKind};
pub use query::{Query, QueryFile};
