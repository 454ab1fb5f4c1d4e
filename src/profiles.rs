//! The `docchat profiles` command.

use anyhow::Result;

use crate::config::Config;
use crate::engine::build_profiles;

/// Print every domain profile, marking the default.
pub fn run_profiles(config: &Config) -> Result<()> {
    let profiles = build_profiles(config)?;
    for name in profiles.names() {
        let marker = if name == profiles.default_name() { "*" } else { " " };
        let template = profiles.template(name).unwrap_or_default();
        println!("{} {:<20} {}", marker, name, first_sentence(template));
    }
    Ok(())
}

fn first_sentence(text: &str) -> &str {
    match text.find(". ") {
        Some(i) => &text[..=i],
        None => text,
    }
}
