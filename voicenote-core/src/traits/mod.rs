pub mod backend;
pub mod block_encoder;
pub mod capture_source;
pub mod container_writer;
pub mod session_delegate;
