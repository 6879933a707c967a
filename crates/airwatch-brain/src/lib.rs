pub mod brain;
pub mod optimizer;
pub mod service;
pub mod template;
