use tracing::{Level, subscriber::SetGlobalDefaultError};

/// Installs a compact stdout subscriber as the global default. Only the binary calls this; the
/// library just emits events.
pub fn init(verbose: bool) -> Result<(), SetGlobalDefaultError> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
