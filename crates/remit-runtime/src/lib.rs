//! # Remit Runtime
//!
//! Process-level wiring for the billing core:
//!
//! - [`config`]: layered `RemitConfig` loading (defaults, `remit.toml`,
//!   `REMIT_*` environment variables) and validation.
//! - [`logging`]: `tracing-subscriber` setup driven by the `[logging]` section.
//! - [`ProviderGateway`]: retries and idempotency keys around provider calls.
//! - [`JsonFileStateStore`]: plugin status and config persisted across restarts.
//! - [`BillingRuntime`]: the bus, plugin registry and ledger assembled, with
//!   checkout, payment, webhook ingestion and expiry entry points.
//!
//! ```rust,ignore
//! use remit_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let runtime = BillingRuntime::builder().catalog(catalog()).build()?;
//!     runtime.restore_plugins().await?;
//!     // ...
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod runtime;
pub mod state_file;

pub use config::{ConfigError, ConfigLoader, ConfigResult, RemitConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use gateway::{
    IdempotencyStore, MemoryIdempotencyStore, ProviderGateway, RetryPolicy, idempotency_key,
};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BillingRuntime, CheckoutOutcome, RuntimeBuilder, WebhookOutcome};
pub use state_file::JsonFileStateStore;

pub mod prelude {
    pub use crate::config::{RemitConfig, load_config, load_config_from_file};
    pub use crate::error::{RuntimeError, RuntimeResult};
    pub use crate::runtime::{BillingRuntime, CheckoutOutcome, WebhookOutcome};
}
