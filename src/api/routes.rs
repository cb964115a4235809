use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers::{self, AppState};
use crate::store::traits::Model;

pub fn create_router<M: Model + 'static>() -> Router<Arc<AppState<M>>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Editable grouping table
        .route(
            "/groupings",
            get(handlers::list_groupings::<M>).post(handlers::add_grouping::<M>),
        )
        .route("/groupings/assign", post(handlers::assign_path::<M>))
        .route(
            "/groupings/:instrument_id",
            get(handlers::get_grouping::<M>)
                .put(handlers::upsert_grouping::<M>)
                .patch(handlers::set_grouping_field::<M>)
                .delete(handlers::remove_grouping::<M>),
        )
        // Pending change-set
        .route("/changes", get(handlers::get_changes::<M>))
        .route("/changes/preview", get(handlers::preview_changes::<M>))
        .route("/changes/validate", get(handlers::validate_changes::<M>))
        // History
        .route("/undo", post(handlers::undo::<M>))
        .route("/redo", post(handlers::redo::<M>))
        .route("/discard", post(handlers::discard::<M>))
        // Apply / rollback
        .route("/apply", post(handlers::apply_changes::<M>))
        .route("/apply/cancel", post(handlers::cancel_apply::<M>))
        .route("/apply/state", get(handlers::get_apply_state::<M>))
        .route("/reload", post(handlers::reload::<M>))
}
