mod auth;
mod health_check;
mod users;

pub use auth::{
    body_error, deactivate_me, login, logout, me, refresh_token, register, update_me,
    LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, UpdateProfileRequest,
};
pub use health_check::health_check;
pub use users::{list_users, ListUsersQuery, UserPage};
