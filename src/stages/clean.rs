use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::{Stage, StageContext};

/// Removes intermediates of the previous run and recreates the directories
/// the early stages write into.
pub struct Clean;

impl Stage for Clean {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn label(&self) -> &'static str {
        "Cleaning build directory..."
    }

    fn progress(&self) -> u8 {
        10
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let layout = ctx.layout;
        for dir in layout.intermediate_dirs() {
            if dir.exists() {
                fs::remove_dir_all(dir)
                    .with_context(|| format!("removing stale directory '{}'", dir.display()))?;
            }
        }
        for file in [&layout.javac_args, &layout.classes_jar] {
            if file.exists() {
                fs::remove_file(file)
                    .with_context(|| format!("removing stale file '{}'", file.display()))?;
            }
        }

        let fresh = vec![
            layout.compiled_res_dir.clone(),
            layout.gen_dir.clone(),
            layout.classes_dir.clone(),
            layout.dex_dir.clone(),
        ];
        for dir in &fresh {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory '{}'", dir.display()))?;
        }
        Ok(fresh)
    }
}
