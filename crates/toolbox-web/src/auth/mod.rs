pub mod client_ip;
pub mod cookies;
pub mod middleware;
pub mod password;
