pub mod config;
pub mod kitty;
pub mod render;
pub mod server;
pub mod synctex;
pub mod viewer;
pub mod watch;
