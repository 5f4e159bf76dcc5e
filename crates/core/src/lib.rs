pub mod config;
pub mod error;
pub mod relation;

pub use config::load_dotenv;
pub use error::*;
pub use relation::Relation;
