pub mod bridge;
pub mod config;
pub mod error;
pub mod keys;
pub mod state;
pub mod vault;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{load_config, save_config, KdfParams, VaultConfig};
pub use error::{AdsVaultError, Result};
pub use state::AppState;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adsvault_app_lib=info,adsvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
