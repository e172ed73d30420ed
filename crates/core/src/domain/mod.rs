pub mod context;
pub mod decision;
pub mod execution;
pub mod intent;
pub mod memory;
pub mod plan;
pub mod request;
pub mod response;
