//! Alert instance lifecycle across evaluation cycles.

mod image;
mod instance;
mod manager;
mod policy;


pub use image::{Image, ImageCapture, ImageRequest, NoopImageService};
pub use instance::{AlertInstance, StateTransition, reason};
pub use manager::{ManagerCfg, StateManager};
pub use policy::{Outcome, exec_err_outcome, no_data_outcome};
