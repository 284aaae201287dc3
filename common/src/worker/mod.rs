// Worker: job consumption and handler dispatch

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::{Dispatcher, DispatcherConfig, HandlerRegistry, JobContext, JobHandler};
pub use handlers::{registry_from_config, BackupHandler, HttpCallbackHandler};
