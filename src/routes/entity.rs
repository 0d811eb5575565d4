//! Entity routes. Handlers resolve the model from the first path segment.

use crate::handlers::entity::{
    add_related, create, delete as delete_handler, list, read, read_related, remove_related, update,
};
use crate::state::AppState;
use axum::{
    routing::{delete, get},
    Router,
};

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/:model", get(list).post(create))
        .route(
            "/:model/:id",
            get(read).put(update).patch(update).delete(delete_handler),
        )
        .route("/:model/:id/:relation", get(read_related).post(add_related))
        .route("/:model/:id/:relation/:related_id", delete(remove_related))
        .with_state(state)
}
