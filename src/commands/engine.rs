use anyhow::{bail, Result};
use colored::Colorize;

use super::open_work_dir;
use crate::engine::{Engine, RuleSet};
use crate::sync::HttpLibrary;

/// Run the automation loop: diff the stores, fire matching rules.
///
/// `once` performs a single tick, for cron-style scheduling and scripting.
pub fn execute(once: bool) -> Result<()> {
    let (work_dir, config) = open_work_dir()?;

    if config.remote.base_url.is_empty() {
        bail!("remote.base_url is not set in config.toml; sync rules need it");
    }
    let remote = HttpLibrary::new(config.remote.base_url.as_str(), config.remote_token())?;

    let rules = RuleSet::load(&work_dir.rules_path())?;
    println!(
        "{} with {} rules",
        "Engine running".bold(),
        rules.rules.len()
    );

    let content_root = std::env::current_dir()?;
    let mut engine = Engine::new(&work_dir, rules, &remote, content_root);

    let interval = std::time::Duration::from_secs(config.engine_poll_secs.max(1));
    loop {
        let actions = engine.tick()?;
        for action in &actions {
            println!(
                "{} {} on {}:{} -> {}",
                "Fired".green().bold(),
                action.rule,
                action.store.name(),
                action.key,
                action.outcome
            );
        }
        if once {
            if actions.is_empty() {
                println!("No events.");
            }
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}
