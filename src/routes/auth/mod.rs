pub mod claims;
pub mod gate;
pub mod session;
