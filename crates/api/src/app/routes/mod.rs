use axum::Router;

pub mod callbacks;
pub mod checkout;
pub mod inventory;
pub mod orders;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .merge(checkout::router())
        .merge(orders::router())
        .nest("/payments", callbacks::router())
        .nest("/inventory", inventory::router())
}
