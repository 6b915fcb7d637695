//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `POST /set_many` - Store several key-value pairs
//! - `GET /get/:key` - Retrieve a value by key
//! - `POST /get_many` - Retrieve several values
//! - `DELETE /del/:key` - Delete a key
//! - `POST /incr/:key` - Add to an integer value
//! - `POST /clear` - Remove every entry
//! - `POST /delete_matched` - Remove keys matching a `LIKE` pattern
//! - `GET /stats` - Get per shard statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
