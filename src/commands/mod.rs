/*!
 * Subcommand implementations for the `switchyard` binary
 */

pub mod check;
pub mod probe;
pub mod route;

use comfy_table::{presets, ContentArrangement, Table};

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}
