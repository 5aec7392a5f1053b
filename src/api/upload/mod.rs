pub mod handlers;

pub use handlers::{upload_config, FILE_FIELD};
