pub mod chat;
pub mod health;
pub mod openai;
pub mod routes;
pub mod schema;
pub mod scout;

pub use routes::build_router;
pub use schema::AppState;
