//! Lifecycle Module
//!
//! Startup and shutdown of a server process: running initializers, holding
//! the resources opened along the way, and releasing them in reverse order
//! once a shutdown signal arrives.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Configuration Loading
//!    ↓
//! 2. Provider / Initializer / Checker / Interceptor Registration
//!    ↓
//! 3. Initializers (topological order, sequential)
//!    ↓
//! 4. Server Start (registration closes)
//!    ↓
//! [Running...]
//!    ↓
//! 5. Shutdown Signal (SIGTERM/SIGINT)
//!    ↓
//! 6. Drain (SIGTERM only, skipped in development)
//!    ↓
//! 7. Server Resources closed, last opened first
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use servecore::lifecycle::{Application, closer_fn};
//!
//! let app = Application::builder()
//!     .closer("db", closer_fn(move || async move { pool.close().await; Ok(()) }))
//!     .build()
//!     .await?;
//! ```

mod application;
mod error;
mod resources;
mod shutdown;
mod traits;

pub use application::{Application, ApplicationBuilder};
pub use error::{LifecycleError, Result};
pub use resources::ServerResources;
pub use shutdown::{DrainHook, ExitReason, ShutdownSignal, drain_hook, shutdown_signal};
pub use traits::{Closer, CloserFn, closer_fn};
