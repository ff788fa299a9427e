pub mod api;
pub mod appresult;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pages;
pub mod presence;
pub mod registry;
pub mod res;
pub mod router;
pub mod session;
pub mod store;

use axum::{Router, extract::FromRef, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use presence::Presence;
pub use router::MessageRouter;
pub use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
    pub presence: Presence,
    pub router: MessageRouter,
}

impl AppState {
    pub fn new(store: Store) -> AppState {
        let presence = Presence::default();
        let router = MessageRouter::new(store.clone(), presence.clone());
        AppState { store, presence, router }
    }
}

pub fn app(app_state: AppState, config: &Config) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_inactivity_minutes)));

    let app = Router::new()
        .route("/", get(pages::index))
        .route("/chat", get(pages::chat))
        .route("/ws", get(gateway::live_channel))
        .route("/static/chat.js", get(res::chat_script))

        .merge(auth::router())
        .nest("/api", api::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    if config.allow_any_origin {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
