pub mod analysis;
pub mod config;
pub mod ensemble;
pub mod models;
pub mod preprocess;
pub mod routes;
pub mod uploads;

pub use analysis::AnalysisService;
pub use config::AppConfig;
pub use uploads::UploadStore;
