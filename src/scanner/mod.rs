pub mod matcher;
pub mod config;
pub mod cache;
pub mod incremental;
pub mod widget;
pub mod detail;
pub mod decoration;
pub mod change;
pub mod conductor;

#[cfg(test)]
mod tests;

pub use matcher::*;
pub use config::*;
pub use cache::*;
pub use incremental::*;
pub use widget::*;
pub use detail::*;
pub use decoration::*;
pub use change::*;
pub use conductor::*;
