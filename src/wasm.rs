//! Browser bindings
//!
//! # Pieces
//! - `ConsoleLogger`: `log` backend writing to the devtools console
//! - `WasmSpawner`: resolution tasks on the JS microtask queue
//! - `JsResolver`: adapts a JS `(token) => Promise<object>` function
//! - `FlightTracker`: the engine handle exported to JS
//!
//! Offsets crossing this boundary are UTF-16 code units, as JS strings
//! index them. The engine itself works in UTF-8 bytes; `FlightTracker`
//! keeps each open document's text to convert between the two.
//!
//! # Usage
//! ```javascript,ignore
//! import init, { FlightTracker } from 'flightcore';
//!
//! await init();
//!
//! const tracker = new FlightTracker({}, async (token) => {
//!   const res = await fetch(`/api/flights/${token}`);
//!   return res.json();
//! });
//!
//! tracker.onRefresh((doc, widgets) => redraw(doc, widgets));
//! const doc = tracker.openDocument("see AA1 soon");
//! tracker.applyEdit(doc, 0, 0, 1, "xsee AA1 soon");
//! ```

use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use futures::future::LocalBoxFuture;

use crate::scanner::{
    DecorationSet, DetailView, DocumentId, Edit, EngineConfig, Record, RenderConductor, RenderStats,
    ResolutionError, Resolver, Spawn, Token, Widget, WidgetStyle,
};

// =============================================================================
// Logging
// =============================================================================

/// `log` backend on top of `web_sys::console`
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&record.args().to_string());
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            _ => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Install the console logger. Later calls only adjust the level.
pub fn init_logging(level: log::LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

// =============================================================================
// Collaborators
// =============================================================================

/// Spawns onto the browser event loop
pub struct WasmSpawner;

impl Spawn for WasmSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

/// Resolver backed by a JS function returning a value or a Promise of one
pub struct JsResolver {
    callback: js_sys::Function,
}

impl JsResolver {
    pub fn new(callback: js_sys::Function) -> Self {
        Self { callback }
    }
}

impl Resolver for JsResolver {
    fn resolve(&self, token: &Token) -> LocalBoxFuture<'static, Result<Record, ResolutionError>> {
        let called = self
            .callback
            .call1(&JsValue::NULL, &JsValue::from_str(token.as_str()));

        Box::pin(async move {
            let value = called.map_err(|e| ResolutionError::Fetch(describe(&e)))?;
            let settled = JsFuture::from(js_sys::Promise::resolve(&value))
                .await
                .map_err(|e| ResolutionError::Fetch(describe(&e)))?;
            record_from_js(settled)
        })
    }
}

/// Plain objects become records; anything else is malformed
fn record_from_js(value: JsValue) -> Result<Record, ResolutionError> {
    if !value.is_object() || js_sys::Array::is_array(&value) {
        return Err(ResolutionError::Malformed(format!(
            "expected an object, got {}",
            value.js_typeof().as_string().unwrap_or_default()
        )));
    }
    serde_wasm_bindgen::from_value(value).map_err(|e| ResolutionError::Malformed(e.to_string()))
}

fn describe(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    match value.dyn_ref::<js_sys::Error>() {
        Some(error) => String::from(error.message()),
        None => format!("{:?}", value),
    }
}

// =============================================================================
// Offset conversion
// =============================================================================

/// Byte offset of UTF-16 index `index`, clamped to the text. An index inside
/// a surrogate pair snaps forward to the next char.
fn utf16_to_byte(text: &str, index: usize) -> usize {
    let mut units = 0;
    for (byte, ch) in text.char_indices() {
        if units >= index {
            return byte;
        }
        units += ch.len_utf16();
    }
    text.len()
}

/// Byte edit for a host edit given in UTF-16 units against `before`
fn edit_from_utf16(before: &str, after: &str, from: usize, to: usize, inserted: usize) -> Edit {
    let from_byte = utf16_to_byte(before, from);
    let to_byte = utf16_to_byte(before, to).max(from_byte);
    let inserted_end = utf16_to_byte(after, from + inserted);
    Edit::new(from_byte, to_byte, inserted_end.saturating_sub(from_byte))
}

/// Maps ascending byte offsets to UTF-16 offsets in one pass
struct Utf16Cursor<'a> {
    text: &'a str,
    byte: usize,
    units: usize,
}

impl<'a> Utf16Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, byte: 0, units: 0 }
    }

    fn advance(&mut self, byte: usize) -> usize {
        let byte = byte.min(self.text.len());
        if byte < self.byte {
            self.byte = 0;
            self.units = 0;
        }
        self.units += self
            .text
            .get(self.byte..byte)
            .map_or(0, |s| s.encode_utf16().count());
        self.byte = byte;
        self.units
    }
}

// =============================================================================
// Serialized views
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WidgetView {
    widget_id: u64,
    token: String,
    style: WidgetStyle,
    class_name: &'static str,
}

impl From<&Widget> for WidgetView {
    fn from(widget: &Widget) -> Self {
        let style = widget.style();
        Self {
            widget_id: widget.id().get(),
            token: widget.label().to_string(),
            style,
            class_name: style.css_class(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecorationView {
    start: usize,
    end: usize,
    #[serde(flatten)]
    widget: WidgetView,
}

/// Views with offsets in UTF-16 units of `text`
fn decoration_views(set: &DecorationSet, text: &str) -> Vec<DecorationView> {
    let mut cursor = Utf16Cursor::new(text);
    set.decorations()
        .iter()
        .map(|d| DecorationView {
            start: cursor.advance(d.occurrence.start),
            end: cursor.advance(d.occurrence.end),
            widget: WidgetView::from(&d.widget),
        })
        .collect()
}

#[derive(Serialize)]
struct SnapshotView {
    decorations: Vec<DecorationView>,
    stats: RenderStats,
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn config_from_js(config: JsValue) -> Result<EngineConfig, JsValue> {
    if config.is_undefined() || config.is_null() {
        return Ok(EngineConfig::default());
    }
    serde_wasm_bindgen::from_value(config).map_err(|e| JsValue::from_str(&e.to_string()))
}

// =============================================================================
// FlightTracker
// =============================================================================

/// Engine handle owned by the host plugin
#[wasm_bindgen]
pub struct FlightTracker {
    conductor: RenderConductor,
    /// Latest text per open document
    texts: RefCell<HashMap<u32, String>>,
}

#[wasm_bindgen]
impl FlightTracker {
    /// `config` may be undefined for the flight-code default
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, resolver: js_sys::Function) -> Result<FlightTracker, JsValue> {
        let config = config_from_js(config)?;
        let conductor = RenderConductor::start(
            config,
            Rc::new(JsResolver::new(resolver)),
            Rc::new(WasmSpawner),
        )
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Self { conductor, texts: RefCell::default() })
    }

    #[wasm_bindgen(js_name = renderSnapshot)]
    pub fn render_snapshot(&self, text: &str) -> Result<JsValue, JsValue> {
        match self.conductor.render_snapshot(text) {
            Some(snapshot) => to_js(&SnapshotView {
                decorations: decoration_views(&snapshot.decorations, text),
                stats: snapshot.stats,
            }),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    #[wasm_bindgen(js_name = openDocument)]
    pub fn open_document(&self, text: &str) -> Option<u32> {
        let doc = self.conductor.open_document(text)?.get() as u32;
        self.texts.borrow_mut().insert(doc, text.to_string());
        Some(doc)
    }

    /// Edit replaced UTF-16 range `from..to` with `inserted_len` units; `text` is the result
    #[wasm_bindgen(js_name = applyEdit)]
    pub fn apply_edit(
        &self,
        doc: u32,
        from: usize,
        to: usize,
        inserted_len: usize,
        text: &str,
    ) -> Result<JsValue, JsValue> {
        // Stored before the conductor runs: refresh callbacks may edit again
        let edit = {
            let mut texts = self.texts.borrow_mut();
            let Some(before) = texts.get_mut(&doc) else {
                return Ok(JsValue::UNDEFINED);
            };
            let edit = edit_from_utf16(before, text, from, to, inserted_len);
            *before = text.to_string();
            edit
        };
        match self.conductor.apply_edit(DocumentId::from(doc as u64), edit, text) {
            Some(outcome) => to_js(&outcome),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    #[wasm_bindgen(js_name = refreshDocument)]
    pub fn refresh_document(&self, doc: u32, text: &str) -> Option<usize> {
        let count = self.conductor.refresh_document(DocumentId::from(doc as u64), text)?;
        self.texts.borrow_mut().insert(doc, text.to_string());
        Some(count)
    }

    #[wasm_bindgen(js_name = closeDocument)]
    pub fn close_document(&self, doc: u32) -> bool {
        self.texts.borrow_mut().remove(&doc);
        self.conductor.close_document(DocumentId::from(doc as u64))
    }

    #[wasm_bindgen]
    pub fn decorations(&self, doc: u32) -> Result<JsValue, JsValue> {
        let Some(set) = self.conductor.decorations(DocumentId::from(doc as u64)) else {
            return Ok(JsValue::UNDEFINED);
        };
        let texts = self.texts.borrow();
        to_js(&decoration_views(&set, texts.get(&doc).map_or("", String::as_str)))
    }

    /// Detail view for the widget covering UTF-16 `offset`, if any
    #[wasm_bindgen(js_name = activateAt)]
    pub fn activate_at(&self, doc: u32, offset: usize) -> Result<JsValue, JsValue> {
        let Some(set) = self.conductor.decorations(DocumentId::from(doc as u64)) else {
            return Ok(JsValue::UNDEFINED);
        };
        let offset = match self.texts.borrow().get(&doc) {
            Some(text) => utf16_to_byte(text, offset),
            None => return Ok(JsValue::UNDEFINED),
        };
        match set.at_offset(offset) {
            Some(decoration) => to_js(&self.conductor.activate(&decoration.widget)),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Detail view for a token, as a static widget would show it
    #[wasm_bindgen]
    pub fn detail(&self, token: &str) -> Result<JsValue, JsValue> {
        let token = Token::from(token);
        let entry = self.conductor.entry(&token);
        to_js(&DetailView::from_entry(&token, entry.as_ref()))
    }

    #[wasm_bindgen(js_name = getEntry)]
    pub fn get_entry(&self, token: &str) -> Result<JsValue, JsValue> {
        match self.conductor.entry(&Token::from(token)) {
            Some(entry) => to_js(&entry),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Re-resolve a failed or stale token
    #[wasm_bindgen]
    pub fn retry(&self, token: &str) -> bool {
        self.conductor.cache().invalidate(&Token::from(token))
    }

    /// `callback(doc, widgets)` runs whenever a token shown in `doc` changes state
    #[wasm_bindgen(js_name = onRefresh)]
    pub fn on_refresh(&self, callback: js_sys::Function) {
        self.conductor.set_refresh_hook(move |doc, widgets| {
            let views: Vec<WidgetView> = widgets.iter().map(WidgetView::from).collect();
            let payload = match to_js(&views) {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("[FlightTracker] refresh payload failed: {:?}", e);
                    return;
                }
            };
            if let Err(e) = callback.call2(&JsValue::NULL, &JsValue::from(doc.get() as u32), &payload) {
                log::warn!("[FlightTracker] refresh callback threw: {}", describe(&e));
            }
        });
    }

    #[wasm_bindgen]
    pub fn reconfigure(&self, config: JsValue) -> Result<(), JsValue> {
        let config = config_from_js(config)?;
        self.conductor
            .reconfigure(config)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(js_name = cacheStats)]
    pub fn cache_stats(&self) -> Result<JsValue, JsValue> {
        to_js(&self.conductor.cache().stats())
    }

    #[wasm_bindgen(js_name = stateName)]
    pub fn state_name(&self) -> String {
        self.conductor.state_name().to_string()
    }

    #[wasm_bindgen]
    pub fn stop(&self) {
        self.conductor.stop();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_to_byte() {
        let text = "Départ AF1234";
        assert_eq!(utf16_to_byte(text, 0), 0);
        assert_eq!(utf16_to_byte(text, 2), 3);
        // 'é' is one UTF-16 unit and two bytes
        assert_eq!(utf16_to_byte(text, 3), 4);
        assert_eq!(utf16_to_byte(text, 7), 8);
        assert_eq!(utf16_to_byte(text, 99), text.len());
    }

    #[test]
    fn test_utf16_surrogate_pair() {
        // '✈' is one unit, the emoji two units and four bytes
        let text = "✈🛫 AA1";
        assert_eq!(utf16_to_byte(text, 1), 3);
        assert_eq!(utf16_to_byte(text, 2), 7);
        assert_eq!(utf16_to_byte(text, 3), 7);
        assert_eq!(utf16_to_byte(text, 4), 8);
    }

    #[test]
    fn test_cursor_maps_ascending_offsets() {
        let text = "Départ AF1234 é BA249";
        let mut cursor = Utf16Cursor::new(text);
        assert_eq!(cursor.advance(8), 7);
        assert_eq!(cursor.advance(14), 13);
        assert_eq!(cursor.advance(18), 16);
        assert_eq!(cursor.advance(text.len()), 21);
        // Going backwards restarts from the beginning
        assert_eq!(cursor.advance(4), 3);
    }

    #[test]
    fn test_edit_from_utf16() {
        let before = "Départ AF1234";
        let after = "Départ é AF1234";
        let edit = edit_from_utf16(before, after, 7, 7, 2);
        assert_eq!(edit, Edit::new(8, 8, 3));

        let edit = edit_from_utf16(after, before, 7, 9, 0);
        assert_eq!(edit, Edit::new(8, 11, 0));
    }
}
