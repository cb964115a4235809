pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

use std::sync::Arc;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::*;

pub use logic::{
    compute_diff, filter_records, ApplyCoordinator, ApplyReport, ApplyState, CancelToken,
    ChangeSetEngine, EditorSession, RecordFilter, UndoHistory, UpsertOutcome, Validator,
};

// Export all model types
pub use model::*;

pub use store::{InMemoryModel, Model, ModelReader, ModelWriter, ReferenceCache};

/// Build the HTTP app around a session freshly loaded from `model`
pub async fn build_app<M: Model + 'static>(
    config: &config::AppConfig,
    model: Arc<M>,
) -> anyhow::Result<axum::Router> {
    let mut session = EditorSession::from_config(config);
    session.reload(model.as_ref()).await?;

    let state = Arc::new(handlers::AppState::new(session, model));
    Ok(routes::create_router().with_state(state))
}

/// Serve the editor against the in-process sandbox model
pub async fn run_server(config: &config::AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let model = if config.sandbox.load_seed_data {
        log::info!("Loading seed data into sandbox model");
        seed::seeded_model()
    } else {
        InMemoryModel::new()
    };

    let app = build_app(config, Arc::new(model)).await?;

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!(
        "Grouping editor for table '{}' running on http://{}",
        config.editor.table_name,
        bind_address
    );

    serve(listener, app).await?;

    Ok(())
}
