mod api;
mod producer;

pub use api::MlflowApi;
pub use producer::MlflowProducer;
