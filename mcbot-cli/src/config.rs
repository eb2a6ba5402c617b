//! Environment overrides for the client tunables, read once and folded
//! into the config handed to the client at construction.

use std::env;
use std::time::Duration;

use once_cell::sync::OnceCell;

use mcbot::client::ClientConfig;


/// Build the client configuration. `MCBOT_TICK_MS` and `MCBOT_MAX_MOVE`
/// override the defaults when set to something parseable.
pub fn client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    if let Some(ms) = tick_ms() {
        config.tick_duration = Duration::from_millis(ms);
    }
    if let Some(max) = max_move() {
        config.max_move_per_tick = max;
    }
    config
}

fn tick_ms() -> Option<u64> {
    static ENV: OnceCell<Option<u64>> = OnceCell::new();
    *ENV.get_or_init(|| {
        env::var("MCBOT_TICK_MS").ok().and_then(|s| s.parse().ok())
    })
}

fn max_move() -> Option<f64> {
    static ENV: OnceCell<Option<f64>> = OnceCell::new();
    *ENV.get_or_init(|| {
        env::var("MCBOT_MAX_MOVE").ok().and_then(|s| s.parse().ok())
    })
}
