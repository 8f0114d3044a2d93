pub mod export;
pub mod upload;

pub use export::export_csv;
pub use upload::upload_csv;
