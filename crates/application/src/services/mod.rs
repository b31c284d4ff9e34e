mod admin_service;
mod session_coordinator;
mod user_service;

pub use admin_service::{AdminService, AdminServiceDependencies};
pub use session_coordinator::{
    ActiveSession, Connection, ConnectionState, SessionCoordinator,
    SessionCoordinatorDependencies,
};
pub use user_service::{
    AuthenticateUserRequest, RegisterUserRequest, UserService, UserServiceDependencies,
};
