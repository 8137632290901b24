pub mod routes;

pub use routes::{create_router, AppState, ACTOR_HEADER};
