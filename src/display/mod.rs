//! Terminal output for the CLI: report tables and styled status lines.

pub mod tables;
pub mod theme;

pub use tables::{create_grouping_table, create_top_exceptions_table, truncate_message};
pub use theme::{THEME, Theme};
