pub mod chatlog;
pub mod external;
pub mod followup;
pub mod intent;
pub mod llm;
pub mod prompt;
pub mod query;
pub mod retrieval;
pub mod sensor_log;
pub mod session;
pub mod statistics;
pub mod time;
