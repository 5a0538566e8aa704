//! Operator reports: account levels and the day's executions.

pub mod executions;
pub mod levels;

pub use executions::{append_csv, day_window, orders_query};
pub use levels::{append_report, render_levels};
