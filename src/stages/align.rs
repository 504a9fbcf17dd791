use anyhow::Result;
use std::path::PathBuf;

use super::{prepare_output, Stage, StageContext};
use crate::config::BuildConfig;
use crate::process::{ensure_exists, Cmd};

/// 4-byte alignment of uncompressed entries, with shared objects page-aligned.
pub struct Align;

impl Stage for Align {
    fn name(&self) -> &'static str {
        "align"
    }

    fn label(&self) -> &'static str {
        "Aligning APK..."
    }

    fn progress(&self) -> u8 {
        80
    }

    fn enabled(&self, config: &BuildConfig) -> bool {
        config.align_enabled
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let input = ctx.current_package()?;
        let output = ctx.layout.aligned_package();
        prepare_output(&output)?;

        let cmd = Cmd::new(&ctx.toolchain.zipalign)
            .args(["-p", "-f", "4"])
            .arg_path(&input)
            .arg_path(&output)
            .error_msg("zipalign failed");
        ctx.run(cmd)?;

        ensure_exists(&output, "Aligned package")?;
        ctx.package = Some(output.clone());
        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn aligns_into_aligned_dir() {
        let fixture = Fixture::new();
        fixture.run_through_packaging().unwrap();
        let input = fixture.package().unwrap();

        fixture.run_stage(&Align).unwrap();
        let layout = fixture.config.layout();
        assert_eq!(fixture.package(), Some(layout.aligned_package()));

        let args = fixture.invoker.calls().pop().unwrap().args_lossy();
        assert_eq!(&args[..3], ["-p", "-f", "4"]);
        assert_eq!(args[3], input.to_string_lossy());
    }

    #[test]
    fn zipalign_failure_is_reported() {
        let fixture = Fixture::new();
        fixture.run_through_packaging().unwrap();
        fixture.invoker.fail("zipalign", "Unable to open as zip archive");
        let err = fixture.run_stage(&Align).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("zipalign failed (exit code 1)"));
        assert!(msg.contains("Unable to open"));
    }
}
