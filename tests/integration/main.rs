//! Integration test modules.

mod chat_feed_test;
mod cover_upload_test;
mod export_test;
mod persistence_test;
mod workout_store_test;
