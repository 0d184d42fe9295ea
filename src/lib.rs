//! FitSync - workout tracker sync core
//!
//! Keeps a local cache of the user's workouts, exercises, profile and the
//! global chat consistent with a hosted backend: REST tables, object storage
//! for cover images, a realtime insert channel and serverless functions.

pub mod chat;
pub mod error;
pub mod export;
pub mod gateway;
pub mod loading;
pub mod media;
pub mod profile;
pub mod storage;
pub mod workouts;

// Re-export commonly used types
pub use chat::ChatFeedStore;
pub use error::StoreError;
pub use export::ExportClient;
pub use gateway::{Gateway, GatewayError, HttpGateway, InMemoryGateway};
pub use media::MediaPipeline;
pub use profile::ProfileStore;
pub use storage::config::AppConfig;
pub use workouts::WorkoutStore;
