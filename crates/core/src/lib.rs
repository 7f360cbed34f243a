pub mod config;
pub mod error;
pub mod model;

pub use config::{
    Config, HealthConfig, SchedulerConfig, ServerConfig, TransportConfig, WorkerSelection, load_dotenv,
};
pub use error::*;
pub use model::*;
