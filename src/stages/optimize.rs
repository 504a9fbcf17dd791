use anyhow::Result;
use std::path::PathBuf;

use super::{prepare_output, Stage, StageContext};
use crate::config::BuildConfig;
use crate::process::{ensure_exists, Cmd};

/// Runs `aapt2 optimize` over the package.
pub struct Optimize;

impl Stage for Optimize {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn label(&self) -> &'static str {
        "Optimizing APK..."
    }

    fn progress(&self) -> u8 {
        70
    }

    fn enabled(&self, config: &BuildConfig) -> bool {
        config.optimize_enabled
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let input = ctx.current_package()?;
        let output = ctx.layout.optimized_package();
        prepare_output(&output)?;

        let cmd = Cmd::new(&ctx.toolchain.aapt2)
            .arg("optimize")
            .arg("-o")
            .arg_path(&output)
            .arg_path(&input)
            .error_msg("aapt2 optimize failed");
        ctx.run(cmd)?;

        ensure_exists(&output, "Optimized package")?;
        ctx.package = Some(output.clone());
        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn optimizes_current_package() {
        let fixture = Fixture::new();
        fixture.run_through_packaging().unwrap();
        let input = fixture.package().unwrap();

        let artifacts = fixture.run_stage(&Optimize).unwrap();
        let layout = fixture.config.layout();
        assert_eq!(artifacts, vec![layout.optimized_package()]);
        assert_eq!(fixture.package(), Some(layout.optimized_package()));

        let args = fixture.invoker.calls().pop().unwrap().args_lossy();
        assert_eq!(args[0], "optimize");
        assert_eq!(args.last().unwrap(), &input.to_string_lossy());
    }

    #[test]
    fn requires_a_package() {
        let fixture = Fixture::new();
        let err = fixture.run_stage(&Optimize).unwrap_err();
        assert!(err.to_string().contains("no package"));
    }
}
