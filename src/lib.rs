//! FlightCore: inline flight-code widgets for note documents
//!
//! A Rust/WASM engine that finds flight-code tokens in text, resolves each
//! distinct token once through an injected async resolver, and keeps
//! clickable widgets in place of the tokens while the text is edited.
//!
//! # Architecture
//!
//! ## Scanner Components
//! - `matcher.rs` - TokenMatcher: regex or literal-phrase token detection
//! - `cache.rs` - ResolutionCache: one shared entry per token, async resolution
//! - `decoration.rs` - DecorationSet: span → widget map, incremental reconcile
//! - `widget.rs` - Widget/WidgetFactory: clickable units bound to a token
//! - `detail.rs` - DetailView: what a clicked widget shows
//! - `conductor.rs` - RenderConductor: static snapshots and live documents
//! - `change.rs` - SnapshotDetector: content-hash skip detection
//! - `incremental.rs` - Edit/HasSpan: span shifting and rescan windows
//! - `config.rs` - EngineConfig: trigger pattern and defaults
//!
//! ## Browser
//! - `wasm.rs` - FlightTracker bindings, JS resolver, console logger
//!
//! # Usage (WASM)
//! ```javascript,ignore
//! import init, { FlightTracker } from 'flightcore';
//!
//! await init();
//!
//! const tracker = new FlightTracker(undefined, (token) => lookupFlight(token));
//! const { decorations, stats } = tracker.renderSnapshot("Flight BA249 departed");
//! console.log(decorations); // [{ start: 7, end: 12, token: 'BA249', style: 'loading', ... }]
//! ```

pub mod scanner;
pub mod wasm;

pub use scanner::*;

use wasm_bindgen::prelude::*;

// When the `wee_alloc` feature is enabled, use `wee_alloc` as the global
// allocator for smaller WASM bundle size.
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Panic hook and console logging for the browser
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    wasm::init_logging(log::LevelFilter::Info);
}

/// Get version information
#[wasm_bindgen]
pub fn version() -> String {
    format!("flightcore v{}", env!("CARGO_PKG_VERSION"))
}
