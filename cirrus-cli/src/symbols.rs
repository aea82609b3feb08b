//! Console symbols
//!
//! Each symbol falls back to ASCII on terminals that cannot show it.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("\u{2713}", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{2717}", "[X]");
pub static WARN: Emoji<'_, '_> = Emoji("!", "[!]");

/// Encrypted content
pub static LOCK: Emoji<'_, '_> = Emoji("\u{1F512}", "[L]");
/// Published content
pub static LINK: Emoji<'_, '_> = Emoji("\u{1F517}", "[>]");

static RULE: Emoji<'_, '_> = Emoji("\u{2500}", "-");

/// Horizontal line of `width` characters
pub fn rule(width: usize) -> String {
    RULE.to_string().repeat(width)
}
