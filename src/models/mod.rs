pub mod emergency;
pub mod intersection;
pub mod signal;
pub mod traffic;
