// Handlers bundled with the relayshare binary

pub mod clipboard;
pub mod cooldown;

use crate::config::Config;
use clipboard::ClipboardHandler;
use relayshare_core::{Handler, HandlerRegistry};
use std::sync::Arc;

/// Register every bundled handler's builder.
pub fn register_all(registry: &mut HandlerRegistry, config: &Config) {
    let clipboard = config.clipboard.clone();
    registry.register_builder(clipboard::HANDLER_NAME, move || {
        Ok(Arc::new(ClipboardHandler::new(&clipboard)?) as Arc<dyn Handler>)
    });
}
