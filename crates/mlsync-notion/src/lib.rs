mod api;
mod consumer;
mod formatter;
mod picker;
mod state;

pub use api::{is_client_error, NotionApi};
pub use consumer::NotionConsumer;
pub use formatter::{format_in, format_out, NotionTable};
pub use picker::pick_page;
pub use state::{ExperimentState, NotionState};
