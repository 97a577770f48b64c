//! Shared UI icons.
//!
//! Each icon has a plain-text fallback used when the terminal cannot render
//! emoji.

use console::Emoji;

// Step outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[ok] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[fail] ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[timeout] ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[skipped] ");
pub static BLOCKED: Emoji<'_, '_> = Emoji("⛔ ", "[not run] ");
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[lookup] ");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "[conn] ");

// Session
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
