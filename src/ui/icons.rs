//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static SEARCH: Emoji<'_, '_> = Emoji("🔎 ", "[>]");
pub static THINKING: Emoji<'_, '_> = Emoji("💭 ", "[..]");
pub static CYCLE: Emoji<'_, '_> = Emoji("🔄 ", "[~]");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "[!]");
