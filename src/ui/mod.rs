pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    entity_line, error, header, muted, online_marker, section, status, success, summary_row, timing, warn,
};
pub use table::{counts_table, TableBuilder};
pub use theme::{Palette, Tone};
