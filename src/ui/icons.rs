//! Status glyphs with plain-text fallbacks for terminals without emoji.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");
pub static SEARCH: Emoji<'_, '_> = Emoji("🔎 ", "[E]");
pub static PENCIL: Emoji<'_, '_> = Emoji("📝 ", "[G]");
pub static LINT: Emoji<'_, '_> = Emoji("🧪 ", "[V]");
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "[X]");
pub static SCALE: Emoji<'_, '_> = Emoji("⚖️  ", "[P]");
pub static REPORT: Emoji<'_, '_> = Emoji("📄 ", "[R]");
