pub mod auth;
pub mod backtest;
pub mod clock;
pub mod error;
pub mod eval;
pub mod labels;
pub mod mapper;
pub mod model;
pub mod optimize;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;
