//! Session and authorization gate.

mod gate;
mod guard;
mod session;
mod token;

pub use gate::{hash_password, AuthGate};
pub use guard::{Access, RouteTable};
pub use session::{Session, SessionState};
pub use token::TokenStore;
