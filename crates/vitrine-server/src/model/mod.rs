pub mod app_state;
pub mod response;

pub use app_state::AppState;
