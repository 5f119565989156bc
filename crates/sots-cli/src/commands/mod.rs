pub mod diff;
pub mod index;
pub mod query;

use anyhow::Result;

use crate::settings::Settings;
use crate::CommonArgs;

/// Print the configuration the other commands would run with.
pub fn show_config(args: &CommonArgs) -> Result<()> {
    let settings = Settings::resolve(args)?;
    println!("# project root: {}", settings.project_root.display());
    println!("# reports dir: {}", settings.reports_dir.display());
    print!("{}", settings.config.to_toml()?);
    Ok(())
}
