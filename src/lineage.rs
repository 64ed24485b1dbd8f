mod annotate;
mod error;
mod observation;
mod table;

pub use annotate::{derive_names, display_name};
pub use error::ValidationError;
pub use observation::Observation;
pub use table::LineageTable;
