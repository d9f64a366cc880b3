pub mod builder;
pub mod formatters;
pub mod models;

pub use builder::{build_report, sort_rows};
pub use formatters::{human_amount, render_summary, render_table, write_csv, write_json};
pub use models::AllowanceRow;
