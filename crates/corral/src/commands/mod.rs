pub mod bootstrap;
pub mod destroy;
pub mod init;
pub mod status;
